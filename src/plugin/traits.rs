//! Plugin capability traits.
//!
//! A plugin implements [`Plugin`] plus any subset of the capability traits and
//! declares that subset through [`Plugin::capabilities`]. The registry checks
//! each declaration against the matching `as_*` accessor at registration time,
//! so a plugin that forgets to override an accessor is rejected up front.
//!
//! ```ignore
//! impl Plugin for NotesPlugin {
//!     fn info(&self) -> PluginInfo { ... }
//!     fn capabilities(&self) -> Vec<Capability> {
//!         vec![Capability::EntityProvider, Capability::CommandProvider]
//!     }
//!     fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
//!         Some(self)
//!     }
//!     fn as_command_provider(self: Arc<Self>) -> Option<Arc<dyn CommandProvider>> {
//!         Some(self)
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Capability, CommandContext, Entity, EntityQuery, EntityTypeInfo, HookConfiguration,
    PluginInfo, PluginResult,
};
use crate::core::PluginEvent;

/// Base trait every plugin implements.
pub trait Plugin: Send + Sync {
    /// Plugin metadata. `info().name` is the registry key.
    fn info(&self) -> PluginInfo;

    /// Capabilities this plugin declares.
    fn capabilities(&self) -> Vec<Capability>;

    fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
        None
    }

    fn as_entity_updater(self: Arc<Self>) -> Option<Arc<dyn EntityUpdater>> {
        None
    }

    fn as_command_provider(self: Arc<Self>) -> Option<Arc<dyn CommandProvider>> {
        None
    }

    fn as_event_emitter(self: Arc<Self>) -> Option<Arc<dyn EventEmitter>> {
        None
    }

    fn as_hook_provider(self: Arc<Self>) -> Option<Arc<dyn HookProvider>> {
        None
    }
}

/// Supplies queryable entities.
#[async_trait]
pub trait EntityProvider: Send + Sync {
    /// Entity types this provider owns.
    fn entity_types(&self) -> Vec<EntityTypeInfo>;

    /// Return entities matching the query.
    async fn query(&self, query: &EntityQuery) -> PluginResult<Vec<Entity>>;

    /// Look up a single entity by id.
    async fn get_entity(&self, id: &str) -> PluginResult<Entity>;
}

/// Applies field updates to entities.
#[async_trait]
pub trait EntityUpdater: Send + Sync {
    /// Entity types this updater accepts.
    fn entity_types(&self) -> Vec<String>;

    /// Update fields on an entity and return the updated value.
    async fn update_entity(&self, id: &str, fields: HashMap<String, Value>) -> PluginResult<Entity>;
}

/// Exposes CLI commands.
pub trait CommandProvider: Send + Sync {
    fn commands(&self) -> Vec<Arc<dyn Command>>;
}

/// A plugin-scoped executable action.
#[async_trait]
pub trait Command: Send + Sync {
    /// Name, unique within the owning plugin.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// Usage string, e.g. "list [--limit N]".
    fn usage(&self) -> &str;

    /// Extended help text.
    fn help(&self) -> &str {
        ""
    }

    async fn execute(&self, ctx: &mut CommandContext, args: &[String]) -> PluginResult<()>;
}

/// Pushes a live stream of events.
///
/// `start_event_stream` runs until the stream ends, `token` is cancelled or
/// `stop_event_stream` is called. Every send must also observe `token` so a
/// full channel cannot block shutdown.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn start_event_stream(
        &self,
        token: CancellationToken,
        events: mpsc::Sender<PluginEvent>,
    ) -> PluginResult<()>;

    /// Signal the stream to end. Must be idempotent.
    ///
    /// May wait until events the stream already accepted are forwarded, so
    /// the receiving side must keep draining while this runs. The dispatcher
    /// cancels `token` only after this returns.
    async fn stop_event_stream(&self) -> PluginResult<()>;
}

/// Installs hooks into a host environment.
pub trait HookProvider: Send + Sync {
    fn hooks(&self) -> Vec<HookConfiguration>;

    fn install_hooks(&self, dir: &Path) -> PluginResult<()>;

    fn refresh_hooks(&self, dir: &Path) -> PluginResult<()>;
}
