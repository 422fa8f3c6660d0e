//! Plugin Runtime Integration Tests
//!
//! Exercises the registry, command registry, dispatcher and JSONL event log
//! together with a plugin defined outside the crate.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sessionscope::core::{Config, JsonlEventRepository, NO_COMMANDS_MESSAGE};
use sessionscope::plugin::{
    Capability, CommandContext, Entity, EntityProvider, EntityQuery, EntityTypeInfo,
    HookConfiguration, HookProvider, OutputBuffer, Plugin, PluginError, PluginInfo,
    PluginRegistry, PluginResult,
};
use sessionscope::plugins::{register_builtin_plugins, NotesPlugin, NOTES_PLUGIN};
use sessionscope::Services;

const HOOKS_FILE: &str = "tickets-hooks.json";

// ============================================================================
// Fixtures
// ============================================================================

/// A read-only ticket tracker with hook support.
struct TicketsPlugin {
    tickets: Vec<Entity>,
}

impl TicketsPlugin {
    fn new() -> Self {
        let tickets = ["Fix login", "Ship release", "Write docs"]
            .iter()
            .enumerate()
            .map(|(i, title)| Entity::new(format!("ticket:{}", i + 1), "ticket").with_field("title", *title))
            .collect();
        Self { tickets }
    }
}

impl Plugin for TicketsPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("tickets", "0.1.0").with_description("Ticket tracker")
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::EntityProvider, Capability::HookProvider]
    }

    fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
        Some(self)
    }

    fn as_hook_provider(self: Arc<Self>) -> Option<Arc<dyn HookProvider>> {
        Some(self)
    }
}

#[async_trait]
impl EntityProvider for TicketsPlugin {
    fn entity_types(&self) -> Vec<EntityTypeInfo> {
        vec![EntityTypeInfo::new("ticket", "Ticket")]
    }

    async fn query(&self, query: &EntityQuery) -> PluginResult<Vec<Entity>> {
        Ok(query.apply(self.tickets.clone()))
    }

    async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
        self.tickets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| PluginError::EntityNotFound(id.to_string()))
    }
}

impl HookProvider for TicketsPlugin {
    fn hooks(&self) -> Vec<HookConfiguration> {
        vec![HookConfiguration {
            trigger_type: "trigger.session.end".to_string(),
            name: "SessionEnd".to_string(),
            description: "Close tickets touched in the session".to_string(),
            command: "tickets sync".to_string(),
            timeout_secs: 30,
        }]
    }

    fn install_hooks(&self, dir: &Path) -> PluginResult<()> {
        let json = serde_json::to_string_pretty(&self.hooks())?;
        std::fs::write(dir.join(HOOKS_FILE), json)?;
        Ok(())
    }

    fn refresh_hooks(&self, dir: &Path) -> PluginResult<()> {
        self.install_hooks(dir)
    }
}

/// A plugin that tries to take over the `note` entity type.
struct NoteThief;

impl Plugin for NoteThief {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("thief", "0.1.0")
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::EntityProvider]
    }

    fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
        Some(self)
    }
}

#[async_trait]
impl EntityProvider for NoteThief {
    fn entity_types(&self) -> Vec<EntityTypeInfo> {
        vec![EntityTypeInfo::new("note", "Note")]
    }

    async fn query(&self, _query: &EntityQuery) -> PluginResult<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
        Err(PluginError::EntityNotFound(id.to_string()))
    }
}

fn registry() -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry).unwrap();
    registry.register_plugin(Arc::new(TicketsPlugin::new())).unwrap();
    registry
}

// ============================================================================
// Registry Tests
// ============================================================================

#[tokio::test]
async fn test_untyped_query_spans_plugins() {
    let registry = registry();

    let all = registry.query(&EntityQuery::all()).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().any(|e| e.id == "note:1"));
    assert!(all.iter().any(|e| e.id == "ticket:3"));

    let tickets = registry.query(&EntityQuery::of_type("ticket").with_limit(2)).await.unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|e| e.entity_type == "ticket"));
}

#[tokio::test]
async fn test_get_entity_routes_by_prefix() {
    let registry = registry();

    let ticket = registry.get_entity("ticket:2").await.unwrap();
    assert_eq!(ticket.field_str("title"), Some("Ship release"));

    let note = registry.get_entity("note:1").await.unwrap();
    assert_eq!(note.entity_type, "note");

    assert!(registry.get_entity("ticket:99").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_update_requires_updater() {
    let registry = registry();
    let fields = [("title".to_string(), serde_json::json!("Closed"))].into_iter().collect();

    let err = registry.update_entity("ticket:1", fields).await.unwrap_err();
    assert!(matches!(err, PluginError::NotUpdatable(_)));
}

#[test]
fn test_conflicting_plugin_is_rejected_whole() {
    let registry = registry();

    let err = registry.register_plugin(Arc::new(NoteThief)).unwrap_err();
    assert_eq!(err.to_string(), "entity type note already provided by plugin notes");
    assert_eq!(registry.len(), 2);
    assert!(registry.plugin("thief").is_err());
    assert_eq!(registry.owner_of("note").as_deref(), Some(NOTES_PLUGIN));
}

#[test]
fn test_hooks_install_and_refresh() {
    let registry = registry();
    let temp = tempfile::tempdir().unwrap();

    let report = registry.install_hooks(temp.path());
    assert!(report.is_success());
    assert_eq!(report.succeeded, vec![NOTES_PLUGIN.to_string(), "tickets".to_string()]);

    let written = std::fs::read_to_string(temp.path().join(HOOKS_FILE)).unwrap();
    assert!(written.contains("SessionEnd"));
    let notes_hooks =
        std::fs::read_to_string(temp.path().join(".sessionscope/hooks/notes.json")).unwrap();
    assert!(notes_hooks.contains("ssc notes add"));

    // A plain file where the hooks directory should be fails every provider.
    let blocked = temp.path().join("blocked");
    std::fs::write(&blocked, "").unwrap();
    let report = registry.refresh_hooks(&blocked);
    assert!(!report.is_success());
    assert!(report.succeeded.is_empty());
    let failed: Vec<_> = report.failed.iter().map(|(plugin, _)| plugin.as_str()).collect();
    assert_eq!(failed, vec![NOTES_PLUGIN, "tickets"]);
}

// ============================================================================
// Runtime Tests
// ============================================================================

#[tokio::test]
async fn test_commands_only_from_command_providers() {
    let services =
        Services::with_registry(Config::default(), registry(), Arc::new(sessionscope::MemoryEventRepository::new()));

    let Err(err) = services.commands.get_command("tickets", "list") else {
        panic!("expected an error");
    };
    assert!(matches!(err, PluginError::NoCommandProvider(_)));

    let listing = services.commands.list_commands();
    assert_ne!(listing, NO_COMMANDS_MESSAGE);
    assert!(listing.contains("notes:\n"));
    assert!(!listing.contains("tickets:"));
}

#[tokio::test]
async fn test_exec_writes_event_log() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("logs").join("events.jsonl");
    let repository = Arc::new(JsonlEventRepository::open(&path).unwrap());
    let services = Services::with_registry(Config::default(), registry(), repository.clone());

    let output = OutputBuffer::new();
    let mut ctx = CommandContext::with_output(services.plugin_context(), output.clone());
    let args = vec!["Retro".to_string(), "went".to_string(), "well".to_string()];

    services
        .with_dispatcher(CancellationToken::new(), async {
            services.commands.execute_command(NOTES_PLUGIN, "add", &args, &mut ctx).await
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.contents(), "Created note:3\n");

    let events = repository.read_all().unwrap();
    let created: Vec<_> = events.iter().filter(|e| e.event_type == "note.created").collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].source(), Some(NOTES_PLUGIN));

    let note = services.registry.get_entity("note:3").await.unwrap();
    assert_eq!(note.field_str("content"), Some("went well"));
}

#[tokio::test]
async fn test_external_emitter_joins_dispatcher() {
    let registry = Arc::new(PluginRegistry::new());
    let notes = Arc::new(NotesPlugin::new());
    registry.register_plugin(notes.clone()).unwrap();

    let repository = Arc::new(sessionscope::MemoryEventRepository::new());
    let services = Services::with_registry(Config::default(), registry, repository.clone());
    let token = CancellationToken::new();

    services
        .with_dispatcher(token.clone(), async {
            // Wait for the stream to come up before stopping.
            for _ in 0..100 {
                if !repository.find_by_type("notes.stream_started").is_empty() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

    let started = repository.find_by_type("notes.stream_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].payload["data"]["note_count"], 0);

    let metrics = services.dispatcher.metrics();
    assert!(!metrics.running);
    assert_eq!(metrics.events_handled, 1);
    assert_eq!(metrics.events_failed, 0);
}
