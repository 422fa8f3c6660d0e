//! Application wiring.
//!
//! [`Services`] builds the plugin registry once and hands the same instance to
//! the command registry and the event dispatcher. Nothing is global; callers
//! that need a registry get it from here.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{
    CommandRegistry, Config, DispatcherConfig, EventDispatcher, EventRepository,
};
use crate::plugin::{CommandContext, HostContext, PluginContext, PluginRegistry, PluginResult};
use crate::plugins::register_builtin_plugins;

/// The assembled plugin runtime.
pub struct Services {
    /// Application configuration
    pub config: Config,

    /// Registry shared by every consumer
    pub registry: Arc<PluginRegistry>,

    /// Command lookup and execution
    pub commands: CommandRegistry,

    /// Event fan-in over every registered emitter
    pub dispatcher: EventDispatcher,

    repository: Arc<dyn EventRepository>,
    context: Arc<dyn PluginContext>,
}

impl Services {
    /// Build services with the built-in plugins registered.
    pub fn new(config: Config, repository: Arc<dyn EventRepository>) -> PluginResult<Self> {
        let registry = Arc::new(PluginRegistry::new());
        register_builtin_plugins(&registry)?;
        Ok(Self::with_registry(config, registry, repository))
    }

    /// Build services over an already populated registry.
    pub fn with_registry(
        config: Config,
        registry: Arc<PluginRegistry>,
        repository: Arc<dyn EventRepository>,
    ) -> Self {
        let context: Arc<dyn PluginContext> =
            Arc::new(HostContext::new(config.working_dir(), Arc::clone(&repository)));
        let commands = CommandRegistry::new(Arc::clone(&registry));
        let dispatcher = EventDispatcher::from_registry(
            &registry,
            Arc::clone(&context),
            DispatcherConfig::with_capacity(config.dispatcher.channel_capacity),
        );

        tracing::debug!(
            plugins = registry.len(),
            emitters = dispatcher.emitter_count(),
            "Services initialized"
        );

        Self { config, registry, commands, dispatcher, repository, context }
    }

    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repository
    }

    pub fn plugin_context(&self) -> Arc<dyn PluginContext> {
        Arc::clone(&self.context)
    }

    /// Command context on the process stdout and stdin.
    pub fn command_context(&self) -> CommandContext {
        CommandContext::new(self.plugin_context())
    }

    /// Run `work` with the dispatcher started, then stop it and drain.
    ///
    /// The dispatcher cannot be restarted, so this succeeds once per
    /// `Services`.
    pub async fn with_dispatcher<T>(
        &self,
        token: CancellationToken,
        work: impl Future<Output = T>,
    ) -> PluginResult<T> {
        self.dispatcher.start(token)?;
        let output = work.await;
        self.dispatcher.stop().await?;
        Ok(output)
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
