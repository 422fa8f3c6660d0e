//! Capability-based plugin registry.
//!
//! Every map lives behind one `RwLock`. Registration takes the write lock and
//! commits all of a plugin's mappings together; lookups take the read lock and
//! clone the `Arc`s they need before any plugin code is awaited.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use super::{
    Capability, CommandProvider, Entity, EntityProvider, EntityQuery, EntityTypeInfo,
    EntityUpdater, EventEmitter, HookProvider, Plugin, PluginError, PluginInfo, PluginResult,
};

/// An event emitter tagged with its owning plugin.
#[derive(Clone)]
pub struct RegisteredEmitter {
    pub plugin: String,
    pub emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for RegisteredEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEmitter").field("plugin", &self.plugin).finish_non_exhaustive()
    }
}

/// Outcome of a hook install or refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookReport {
    /// Plugins whose hooks were applied.
    pub succeeded: Vec<String>,
    /// Plugins that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl HookReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    /// Plugin names in registration order.
    order: Vec<String>,
    entity_types: Vec<EntityTypeInfo>,
    /// Entity type -> (owner, provider).
    providers_by_type: HashMap<String, (String, Arc<dyn EntityProvider>)>,
    providers: Vec<(String, Arc<dyn EntityProvider>)>,
    /// Entity type -> (owner, updater).
    updaters_by_type: HashMap<String, (String, Arc<dyn EntityUpdater>)>,
    updaters: Vec<(String, Arc<dyn EntityUpdater>)>,
    command_providers: HashMap<String, Arc<dyn CommandProvider>>,
    emitters: Vec<RegisteredEmitter>,
    hook_providers: Vec<(String, Arc<dyn HookProvider>)>,
}

/// Capabilities resolved from a plugin before anything is committed.
#[derive(Default)]
struct Resolved {
    entity_provider: Option<(Arc<dyn EntityProvider>, Vec<EntityTypeInfo>)>,
    entity_updater: Option<(Arc<dyn EntityUpdater>, Vec<String>)>,
    command_provider: Option<Arc<dyn CommandProvider>>,
    event_emitter: Option<Arc<dyn EventEmitter>>,
    hook_provider: Option<Arc<dyn HookProvider>>,
}

fn resolve(name: &str, plugin: &Arc<dyn Plugin>) -> PluginResult<Resolved> {
    let mismatch = |capability: Capability| PluginError::CapabilityMismatch {
        plugin: name.to_string(),
        capability: capability.to_string(),
    };

    let mut resolved = Resolved::default();
    for capability in plugin.capabilities() {
        let plugin = Arc::clone(plugin);
        match capability {
            Capability::EntityProvider => {
                let provider = plugin.as_entity_provider().ok_or_else(|| mismatch(capability))?;
                let types = provider.entity_types();
                resolved.entity_provider = Some((provider, types));
            }
            Capability::EntityUpdater => {
                let updater = plugin.as_entity_updater().ok_or_else(|| mismatch(capability))?;
                let types = updater.entity_types();
                resolved.entity_updater = Some((updater, types));
            }
            Capability::CommandProvider => {
                resolved.command_provider =
                    Some(plugin.as_command_provider().ok_or_else(|| mismatch(capability))?);
            }
            Capability::EventEmitter => {
                resolved.event_emitter =
                    Some(plugin.as_event_emitter().ok_or_else(|| mismatch(capability))?);
            }
            Capability::HookProvider => {
                resolved.hook_provider =
                    Some(plugin.as_hook_provider().ok_or_else(|| mismatch(capability))?);
            }
        }
    }
    Ok(resolved)
}

/// Fails if any of `types` is already in `claimed` or repeats within `types`.
fn check_unclaimed<'a, V>(
    name: &str,
    types: impl Iterator<Item = &'a str>,
    claimed: &HashMap<String, (String, V)>,
) -> PluginResult<()> {
    let mut seen = Vec::new();
    for entity_type in types {
        let owner = claimed
            .get(entity_type)
            .map(|(owner, _)| owner.as_str())
            .or_else(|| seen.contains(&entity_type).then_some(name));
        if let Some(owner) = owner {
            return Err(PluginError::EntityTypeConflict {
                entity_type: entity_type.to_string(),
                owner: owner.to_string(),
            });
        }
        seen.push(entity_type);
    }
    Ok(())
}

/// Registry of plugins and the capabilities they provide.
#[derive(Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// Every declared capability is validated and every entity type checked for
    /// conflicts before any mapping is written, so a failed registration leaves
    /// the registry untouched. Plugin code runs before the registry is locked,
    /// so a plugin may read the registry while it is being registered.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let info = plugin.info();
        let name = info.name.clone();

        if self.state.read().plugins.contains_key(&name) {
            return Err(PluginError::AlreadyRegistered(name));
        }

        let resolved = resolve(&name, &plugin)?;

        let mut state = self.state.write();
        // Checked again: another registration may have committed meanwhile.
        if state.plugins.contains_key(&name) {
            return Err(PluginError::AlreadyRegistered(name));
        }
        if let Some((_, types)) = &resolved.entity_provider {
            check_unclaimed(
                &name,
                types.iter().map(|t| t.entity_type.as_str()),
                &state.providers_by_type,
            )?;
        }
        if let Some((_, types)) = &resolved.entity_updater {
            check_unclaimed(&name, types.iter().map(String::as_str), &state.updaters_by_type)?;
        }

        if let Some((provider, types)) = resolved.entity_provider {
            for type_info in types {
                state
                    .providers_by_type
                    .insert(type_info.entity_type.clone(), (name.clone(), Arc::clone(&provider)));
                state.entity_types.push(type_info);
            }
            state.providers.push((name.clone(), provider));
        }
        if let Some((updater, types)) = resolved.entity_updater {
            for entity_type in types {
                state.updaters_by_type.insert(entity_type, (name.clone(), Arc::clone(&updater)));
            }
            state.updaters.push((name.clone(), updater));
        }
        if let Some(provider) = resolved.command_provider {
            state.command_providers.insert(name.clone(), provider);
        }
        if let Some(emitter) = resolved.event_emitter {
            state.emitters.push(RegisteredEmitter { plugin: name.clone(), emitter });
        }
        if let Some(hooks) = resolved.hook_provider {
            state.hook_providers.push((name.clone(), hooks));
        }

        state.order.push(name.clone());
        state.plugins.insert(name.clone(), plugin);

        tracing::debug!(plugin = %name, version = %info.version, "Registered plugin");
        Ok(())
    }

    /// Get a plugin by name.
    pub fn plugin(&self, name: &str) -> PluginResult<Arc<dyn Plugin>> {
        self.state.read().plugins.get(name).cloned().ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Get the provider that owns an entity type.
    pub fn plugin_for_entity_type(&self, entity_type: &str) -> PluginResult<Arc<dyn EntityProvider>> {
        self.state
            .read()
            .providers_by_type
            .get(entity_type)
            .map(|(_, provider)| Arc::clone(provider))
            .ok_or_else(|| PluginError::NoProvider(entity_type.to_string()))
    }

    /// Name of the plugin that owns an entity type.
    pub fn owner_of(&self, entity_type: &str) -> Option<String> {
        self.state.read().providers_by_type.get(entity_type).map(|(owner, _)| owner.clone())
    }

    /// Get a plugin's command provider.
    pub fn command_provider(&self, name: &str) -> PluginResult<Arc<dyn CommandProvider>> {
        let state = self.state.read();
        if let Some(provider) = state.command_providers.get(name) {
            return Ok(Arc::clone(provider));
        }
        if state.plugins.contains_key(name) {
            Err(PluginError::NoCommandProvider(name.to_string()))
        } else {
            Err(PluginError::NotFound(name.to_string()))
        }
    }

    /// All plugins in registration order.
    pub fn all_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let state = self.state.read();
        state.order.iter().filter_map(|name| state.plugins.get(name).cloned()).collect()
    }

    /// Info for every plugin in registration order.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.all_plugins().iter().map(|p| p.info()).collect()
    }

    /// Every registered entity type in registration order.
    pub fn all_entity_types(&self) -> Vec<EntityTypeInfo> {
        self.state.read().entity_types.clone()
    }

    /// Command providers keyed by plugin name, in registration order.
    pub fn all_command_providers(&self) -> Vec<(String, Arc<dyn CommandProvider>)> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|name| {
                state.command_providers.get(name).map(|p| (name.clone(), Arc::clone(p)))
            })
            .collect()
    }

    /// A copy of the registered emitters.
    pub fn event_emitters(&self) -> Vec<RegisteredEmitter> {
        self.state.read().emitters.clone()
    }

    pub fn hook_providers(&self) -> Vec<(String, Arc<dyn HookProvider>)> {
        self.state.read().hook_providers.clone()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().order.is_empty()
    }

    /// Query entities.
    ///
    /// A typed query goes to the type's owner and its error propagates. An
    /// untyped query runs against every provider concurrently; failing
    /// providers are logged and left out of the result.
    pub async fn query(&self, query: &EntityQuery) -> PluginResult<Vec<Entity>> {
        if let Some(entity_type) = &query.entity_type {
            let provider = self.plugin_for_entity_type(entity_type)?;
            return provider.query(query).await;
        }

        let providers = self.state.read().providers.clone();
        let results = join_all(
            providers.iter().map(|(name, provider)| async move { (name, provider.query(query).await) }),
        )
        .await;

        let mut entities = Vec::new();
        for (name, result) in results {
            match result {
                Ok(mut found) => entities.append(&mut found),
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "Entity query failed");
                }
            }
        }
        Ok(entities)
    }

    /// Look up an entity by id.
    ///
    /// Ids shaped `<type>:<rest>` with a registered `<type>` go straight to the
    /// owner. Other ids are tried against each provider in registration order.
    pub async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
        if let Some(provider) = self.typed_provider(id) {
            return provider.get_entity(id).await;
        }

        let providers = self.state.read().providers.clone();
        for (name, provider) in providers {
            match provider.get_entity(id).await {
                Ok(entity) => return Ok(entity),
                Err(e) => tracing::trace!(plugin = %name, id, error = %e, "Provider miss"),
            }
        }
        Err(PluginError::EntityNotFound(id.to_string()))
    }

    /// Look up an entity through a specific type's provider.
    pub async fn get_entity_of_type(&self, entity_type: &str, id: &str) -> PluginResult<Entity> {
        self.plugin_for_entity_type(entity_type)?.get_entity(id).await
    }

    /// Update an entity. Routing follows [`Self::get_entity`].
    pub async fn update_entity(
        &self,
        id: &str,
        fields: HashMap<String, Value>,
    ) -> PluginResult<Entity> {
        if let Some(updater) = self.typed_updater(id) {
            return updater.update_entity(id, fields).await;
        }

        let updaters = self.state.read().updaters.clone();
        for (name, updater) in updaters {
            match updater.update_entity(id, fields.clone()).await {
                Ok(entity) => return Ok(entity),
                Err(e) => tracing::trace!(plugin = %name, id, error = %e, "Updater miss"),
            }
        }
        Err(PluginError::NotUpdatable(id.to_string()))
    }

    /// Update an entity through a specific type's updater.
    pub async fn update_entity_of_type(
        &self,
        entity_type: &str,
        id: &str,
        fields: HashMap<String, Value>,
    ) -> PluginResult<Entity> {
        let updater = self
            .state
            .read()
            .updaters_by_type
            .get(entity_type)
            .map(|(_, updater)| Arc::clone(updater))
            .ok_or_else(|| PluginError::NotUpdatable(format!("{}:{}", entity_type, id)))?;
        updater.update_entity(id, fields).await
    }

    fn typed_provider(&self, id: &str) -> Option<Arc<dyn EntityProvider>> {
        let (entity_type, _) = id.split_once(':')?;
        self.state.read().providers_by_type.get(entity_type).map(|(_, p)| Arc::clone(p))
    }

    fn typed_updater(&self, id: &str) -> Option<Arc<dyn EntityUpdater>> {
        let (entity_type, _) = id.split_once(':')?;
        self.state.read().updaters_by_type.get(entity_type).map(|(_, u)| Arc::clone(u))
    }

    /// Install hooks for every hook provider.
    pub fn install_hooks(&self, dir: &Path) -> HookReport {
        self.run_hooks(dir, "install", |provider, dir| provider.install_hooks(dir))
    }

    /// Refresh hooks for every hook provider.
    pub fn refresh_hooks(&self, dir: &Path) -> HookReport {
        self.run_hooks(dir, "refresh", |provider, dir| provider.refresh_hooks(dir))
    }

    fn run_hooks(
        &self,
        dir: &Path,
        action: &str,
        run: impl Fn(&dyn HookProvider, &Path) -> PluginResult<()>,
    ) -> HookReport {
        let mut report = HookReport::default();
        for (name, provider) in self.hook_providers() {
            match run(provider.as_ref(), dir) {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    tracing::warn!(plugin = %name, action, error = %e, "Hook operation failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").field("plugins", &self.state.read().order).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PluginEvent;
    use crate::plugin::HookConfiguration;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct MockPlugin {
        name: String,
        version: String,
        declared: Vec<Capability>,
        implemented: Vec<Capability>,
        types: Vec<String>,
        entities: Vec<Entity>,
        fail_query: bool,
        fail_hooks: bool,
    }

    impl MockPlugin {
        fn new(name: &str) -> Self {
            Self { name: name.to_string(), version: "1.0.0".to_string(), ..Self::default() }
        }

        /// Declare and implement a capability.
        fn with(mut self, capability: Capability) -> Self {
            self.declared.push(capability);
            self.implemented.push(capability);
            self
        }

        /// Declare a capability without implementing it.
        fn claiming(mut self, capability: Capability) -> Self {
            self.declared.push(capability);
            self
        }

        fn with_type(mut self, entity_type: &str) -> Self {
            self.types.push(entity_type.to_string());
            self
        }

        fn with_entity(mut self, id: &str, entity_type: &str) -> Self {
            self.entities.push(Entity::new(id, entity_type).with_field("plugin", self.name.clone()));
            self
        }

        fn has(&self, capability: Capability) -> bool {
            self.implemented.contains(&capability)
        }
    }

    impl Plugin for MockPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new(&self.name, &self.version)
        }

        fn capabilities(&self) -> Vec<Capability> {
            self.declared.clone()
        }

        fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
            self.has(Capability::EntityProvider).then(|| self as Arc<dyn EntityProvider>)
        }

        fn as_entity_updater(self: Arc<Self>) -> Option<Arc<dyn EntityUpdater>> {
            self.has(Capability::EntityUpdater).then(|| self as Arc<dyn EntityUpdater>)
        }

        fn as_command_provider(self: Arc<Self>) -> Option<Arc<dyn CommandProvider>> {
            self.has(Capability::CommandProvider).then(|| self as Arc<dyn CommandProvider>)
        }

        fn as_event_emitter(self: Arc<Self>) -> Option<Arc<dyn EventEmitter>> {
            self.has(Capability::EventEmitter).then(|| self as Arc<dyn EventEmitter>)
        }

        fn as_hook_provider(self: Arc<Self>) -> Option<Arc<dyn HookProvider>> {
            self.has(Capability::HookProvider).then(|| self as Arc<dyn HookProvider>)
        }
    }

    #[async_trait]
    impl EntityProvider for MockPlugin {
        fn entity_types(&self) -> Vec<EntityTypeInfo> {
            self.types.iter().map(|t| EntityTypeInfo::new(t, t)).collect()
        }

        async fn query(&self, query: &EntityQuery) -> PluginResult<Vec<Entity>> {
            if self.fail_query {
                return Err(PluginError::Execution(format!("{} is down", self.name)));
            }
            Ok(query.apply(self.entities.clone()))
        }

        async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
            self.entities
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| PluginError::EntityNotFound(id.to_string()))
        }
    }

    #[async_trait]
    impl EntityUpdater for MockPlugin {
        fn entity_types(&self) -> Vec<String> {
            self.types.clone()
        }

        async fn update_entity(
            &self,
            id: &str,
            fields: HashMap<String, Value>,
        ) -> PluginResult<Entity> {
            let mut entity = self.get_entity(id).await?;
            entity.fields.extend(fields);
            Ok(entity)
        }
    }

    impl CommandProvider for MockPlugin {
        fn commands(&self) -> Vec<Arc<dyn crate::plugin::Command>> {
            Vec::new()
        }
    }

    #[async_trait]
    impl EventEmitter for MockPlugin {
        async fn start_event_stream(
            &self,
            _token: CancellationToken,
            _events: mpsc::Sender<PluginEvent>,
        ) -> PluginResult<()> {
            Ok(())
        }

        async fn stop_event_stream(&self) -> PluginResult<()> {
            Ok(())
        }
    }

    impl HookProvider for MockPlugin {
        fn hooks(&self) -> Vec<HookConfiguration> {
            Vec::new()
        }

        fn install_hooks(&self, _dir: &Path) -> PluginResult<()> {
            if self.fail_hooks {
                Err(PluginError::Execution("settings file is read-only".to_string()))
            } else {
                Ok(())
            }
        }

        fn refresh_hooks(&self, dir: &Path) -> PluginResult<()> {
            self.install_hooks(dir)
        }
    }

    fn register(registry: &PluginRegistry, plugin: MockPlugin) -> PluginResult<()> {
        registry.register_plugin(Arc::new(plugin))
    }

    /// Provider whose entity types depend on what is already registered.
    struct IntrospectingPlugin {
        registry: Arc<PluginRegistry>,
    }

    impl Plugin for IntrospectingPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("introspect", "1.0.0")
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::EntityProvider]
        }

        fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
            Some(self)
        }
    }

    #[async_trait]
    impl EntityProvider for IntrospectingPlugin {
        fn entity_types(&self) -> Vec<EntityTypeInfo> {
            let suffix = self.registry.len();
            let taken = self.registry.owner_of("mirror").is_some();
            let name = if taken { format!("mirror{}", suffix) } else { "mirror".to_string() };
            vec![EntityTypeInfo::new(&name, "Mirror")]
        }

        async fn query(&self, _query: &EntityQuery) -> PluginResult<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
            Err(PluginError::EntityNotFound(id.to_string()))
        }
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let registry = PluginRegistry::new();
        register(&registry, MockPlugin::new("claude-code")).unwrap();

        let mut second = MockPlugin::new("claude-code");
        second.version = "2.0.0".to_string();
        let err = register(&registry, second).unwrap_err();

        assert!(matches!(err, PluginError::AlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.plugin("claude-code").unwrap().info().version, "1.0.0");
    }

    #[test]
    fn test_plugin_may_read_registry_while_registering() {
        let registry = Arc::new(PluginRegistry::new());
        let owner = MockPlugin::new("mirror-owner").with(Capability::EntityProvider).with_type("mirror");
        register(&registry, owner).unwrap();

        registry
            .register_plugin(Arc::new(IntrospectingPlugin { registry: Arc::clone(&registry) }))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.owner_of("mirror1").as_deref(), Some("introspect"));
        assert_eq!(registry.owner_of("mirror").as_deref(), Some("mirror-owner"));
    }

    #[test]
    fn test_capability_mismatch_is_atomic() {
        let registry = PluginRegistry::new();
        let plugin = MockPlugin::new("broken")
            .with(Capability::EntityProvider)
            .with_type("task")
            .claiming(Capability::CommandProvider);

        let err = register(&registry, plugin).unwrap_err();
        assert_eq!(
            err.to_string(),
            "plugin broken declares ICommandProvider capability but doesn't implement it"
        );

        assert!(registry.is_empty());
        assert!(registry.plugin_for_entity_type("task").is_err());
        assert!(registry.all_entity_types().is_empty());
    }

    #[test]
    fn test_entity_type_conflict_names_owner() {
        let registry = PluginRegistry::new();
        register(&registry, MockPlugin::new("plugin1").with(Capability::EntityProvider).with_type("task"))
            .unwrap();

        let err = register(
            &registry,
            MockPlugin::new("plugin2")
                .with(Capability::EntityProvider)
                .with_type("issue")
                .with_type("task"),
        )
        .unwrap_err();

        assert!(err.to_string().contains("already provided by plugin plugin1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.plugin_for_entity_type("issue").is_err());
        assert_eq!(registry.owner_of("task").as_deref(), Some("plugin1"));
    }

    #[test]
    fn test_lookups() {
        let registry = PluginRegistry::new();
        register(&registry, MockPlugin::new("with-commands").with(Capability::CommandProvider))
            .unwrap();
        register(&registry, MockPlugin::new("plain")).unwrap();

        assert!(registry.command_provider("with-commands").is_ok());
        assert!(matches!(
            registry.command_provider("plain"),
            Err(PluginError::NoCommandProvider(_))
        ));
        assert!(matches!(registry.command_provider("missing"), Err(PluginError::NotFound(_))));
        assert!(matches!(registry.plugin("missing"), Err(e) if e.is_not_found()));

        let names: Vec<_> = registry.plugin_infos().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["with-commands", "plain"]);
        assert_eq!(registry.all_command_providers().len(), 1);
    }

    #[tokio::test]
    async fn test_typed_query_routes_to_owner() {
        let registry = PluginRegistry::new();
        register(
            &registry,
            MockPlugin::new("claude-code")
                .with(Capability::EntityProvider)
                .with_type("session")
                .with_entity("session:1", "session")
                .with_entity("session:2", "session"),
        )
        .unwrap();
        register(
            &registry,
            MockPlugin::new("tasks")
                .with(Capability::EntityProvider)
                .with_type("task")
                .with_entity("task:1", "task"),
        )
        .unwrap();

        let sessions = registry.query(&EntityQuery::of_type("session")).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|e| e.field_str("plugin") == Some("claude-code")));

        let err = registry.query(&EntityQuery::of_type("unknown")).await.unwrap_err();
        assert!(matches!(err, PluginError::NoProvider(_)));
    }

    #[tokio::test]
    async fn test_untyped_query_skips_failing_provider() {
        let registry = PluginRegistry::new();
        register(
            &registry,
            MockPlugin::new("first")
                .with(Capability::EntityProvider)
                .with_type("a")
                .with_entity("a:1", "a"),
        )
        .unwrap();
        let mut failing =
            MockPlugin::new("failing").with(Capability::EntityProvider).with_type("b");
        failing.fail_query = true;
        register(&registry, failing).unwrap();
        register(
            &registry,
            MockPlugin::new("third")
                .with(Capability::EntityProvider)
                .with_type("c")
                .with_entity("c:1", "c")
                .with_entity("c:2", "c"),
        )
        .unwrap();

        let ids: Vec<_> =
            registry.query(&EntityQuery::all()).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a:1", "c:1", "c:2"]);

        let err = registry.query(&EntityQuery::of_type("b")).await.unwrap_err();
        assert!(err.to_string().contains("failing is down"));
    }

    #[tokio::test]
    async fn test_get_entity_routing() {
        let registry = PluginRegistry::new();
        register(
            &registry,
            MockPlugin::new("first")
                .with(Capability::EntityProvider)
                .with_type("a")
                .with_entity("shared", "a")
                .with_entity("a:1", "a"),
        )
        .unwrap();
        register(
            &registry,
            MockPlugin::new("second")
                .with(Capability::EntityProvider)
                .with_type("b")
                .with_entity("shared", "b")
                .with_entity("plain-b", "b"),
        )
        .unwrap();

        // Unprefixed ids are tried in registration order.
        assert_eq!(registry.get_entity("shared").await.unwrap().field_str("plugin"), Some("first"));
        assert_eq!(registry.get_entity("plain-b").await.unwrap().entity_type, "b");

        assert_eq!(registry.get_entity("a:1").await.unwrap().field_str("plugin"), Some("first"));
        assert!(matches!(registry.get_entity("a:404").await, Err(PluginError::EntityNotFound(_))));
        assert!(matches!(registry.get_entity("nope").await, Err(PluginError::EntityNotFound(_))));

        let entity = registry.get_entity_of_type("b", "shared").await.unwrap();
        assert_eq!(entity.field_str("plugin"), Some("second"));
    }

    #[tokio::test]
    async fn test_update_entity() {
        let registry = PluginRegistry::new();
        register(
            &registry,
            MockPlugin::new("tasks")
                .with(Capability::EntityProvider)
                .with(Capability::EntityUpdater)
                .with_type("task")
                .with_entity("task:1", "task"),
        )
        .unwrap();

        let mut fields = HashMap::new();
        fields.insert("status".to_string(), Value::from("done"));

        let entity = registry.update_entity("task:1", fields.clone()).await.unwrap();
        assert_eq!(entity.field_str("status"), Some("done"));

        let err = registry.update_entity("task:9", fields.clone()).await.unwrap_err();
        assert!(err.is_not_found());

        let err = registry.update_entity_of_type("note", "x", fields).await.unwrap_err();
        assert!(matches!(err, PluginError::NotUpdatable(_)));
    }

    #[test]
    fn test_event_emitters_is_a_copy() {
        let registry = PluginRegistry::new();
        register(&registry, MockPlugin::new("emitter-1").with(Capability::EventEmitter)).unwrap();
        register(&registry, MockPlugin::new("emitter-2").with(Capability::EventEmitter)).unwrap();

        let mut emitters = registry.event_emitters();
        emitters.clear();

        let emitters = registry.event_emitters();
        assert_eq!(emitters.len(), 2);
        assert_eq!(emitters[0].plugin, "emitter-1");
    }

    #[test]
    fn test_hook_report() {
        let registry = PluginRegistry::new();
        register(&registry, MockPlugin::new("good").with(Capability::HookProvider)).unwrap();
        let mut bad = MockPlugin::new("bad").with(Capability::HookProvider);
        bad.fail_hooks = true;
        register(&registry, bad).unwrap();

        let report = registry.install_hooks(Path::new("."));
        assert_eq!(report.succeeded, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert!(!report.is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries() {
        let registry = Arc::new(PluginRegistry::new());
        register(
            &registry,
            MockPlugin::new("tasks")
                .with(Capability::EntityProvider)
                .with_type("task")
                .with_entity("task:1", "task"),
        )
        .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.query(&EntityQuery::of_type("task")).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 1);
        }
    }
}
