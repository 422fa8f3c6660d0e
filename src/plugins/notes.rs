//! Built-in notes plugin.
//!
//! Keeps a small in-memory notebook and exposes it through every
//! entity-facing capability: notes are queryable and updatable entities,
//! `ssc notes <command>` manages them, and changes are streamed as events
//! while the dispatcher is running. Its one hook records a note when an
//! agent session ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::PluginEvent;
use crate::plugin::{
    Capability, Command, CommandContext, CommandProvider, Entity, EntityProvider, EntityQuery,
    EntityTypeInfo, EntityUpdater, EventEmitter, HookConfiguration, HookProvider, Plugin,
    PluginError, PluginInfo, PluginResult,
};

/// Registry name of the plugin.
pub const NOTES_PLUGIN: &str = "notes";

/// Entity type provided by the plugin.
pub const NOTE_TYPE: &str = "note";

/// Directory, relative to the install dir, that receives hook files.
pub const HOOKS_DIR: &str = ".sessionscope/hooks";

/// A single note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    fn to_entity(&self) -> Entity {
        Entity::new(&self.id, NOTE_TYPE)
            .with_field("title", self.title.clone())
            .with_field("content", self.content.clone())
            .with_field("created_at", self.created_at.to_rfc3339())
            .with_field("updated_at", self.updated_at.to_rfc3339())
    }
}

/// Notebook state shared by the plugin and its commands.
struct NoteStore {
    notes: RwLock<Vec<Note>>,
    next_id: AtomicUsize,
    /// Guards `publish` so no event lands in the outbox after streaming ends.
    streaming: Mutex<bool>,
    outbox: mpsc::UnboundedSender<PluginEvent>,
    /// Held by the running stream for its whole lifetime.
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<PluginEvent>>,
}

impl NoteStore {
    fn new() -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            notes: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            streaming: Mutex::new(false),
            outbox,
            inbox: tokio::sync::Mutex::new(inbox),
        }
    }

    fn insert(&self, title: &str, content: &str, created_at: DateTime<Utc>) -> Note {
        let id = format!("{}:{}", NOTE_TYPE, self.next_id.fetch_add(1, Ordering::SeqCst));
        let note = Note {
            id,
            title: title.to_string(),
            content: content.to_string(),
            created_at,
            updated_at: created_at,
        };
        self.notes.write().push(note.clone());
        note
    }

    fn get(&self, id: &str) -> PluginResult<Note> {
        self.notes
            .read()
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| PluginError::EntityNotFound(id.to_string()))
    }

    fn all(&self) -> Vec<Note> {
        self.notes.read().clone()
    }

    fn update(&self, id: &str, fields: &HashMap<String, Value>) -> PluginResult<Note> {
        let mut title = None;
        let mut content = None;
        for (key, value) in fields {
            let text = value.as_str().ok_or_else(|| {
                PluginError::InvalidArgument(format!("note field {} must be a string", key))
            })?;
            match key.as_str() {
                "title" => title = Some(text.to_string()),
                "content" => content = Some(text.to_string()),
                other => {
                    return Err(PluginError::InvalidArgument(format!("unknown note field: {}", other)))
                }
            }
        }

        let mut notes = self.notes.write();
        let note = notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| PluginError::EntityNotFound(id.to_string()))?;
        if let Some(title) = title {
            note.title = title;
        }
        if let Some(content) = content {
            note.content = content;
        }
        note.updated_at = Utc::now();
        Ok(note.clone())
    }

    /// Queue an event for the live stream. Returns false when no stream is
    /// running.
    fn publish(&self, event: PluginEvent) -> bool {
        let streaming = self.streaming.lock();
        *streaming && self.outbox.send(event).is_ok()
    }

    fn set_streaming(&self, streaming: bool) {
        *self.streaming.lock() = streaming;
    }

    fn is_streaming(&self) -> bool {
        *self.streaming.lock()
    }

    /// Put `event` and everything still in `inbox` back on the queue, in order,
    /// for the next stream.
    fn requeue(&self, event: PluginEvent, inbox: &mut mpsc::UnboundedReceiver<PluginEvent>) {
        let mut pending = vec![event];
        while let Ok(queued) = inbox.try_recv() {
            pending.push(queued);
        }
        tracing::debug!(count = pending.len(), "Notes stream ended with queued events");
        for queued in pending {
            // The receiver is held by the caller, so the send cannot fail.
            let _ = self.outbox.send(queued);
        }
    }
}

/// Forward one event, giving it back if `token` fires or the channel closes.
async fn forward(
    event: PluginEvent,
    events: &mpsc::Sender<PluginEvent>,
    token: &CancellationToken,
) -> Result<(), PluginEvent> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(event),
        permit = events.reserve() => match permit {
            Ok(permit) => {
                permit.send(event);
                Ok(())
            }
            Err(_) => Err(event),
        },
    }
}

fn note_event(event_type: &str, note: &Note) -> PluginEvent {
    PluginEvent::new(event_type, NOTES_PLUGIN)
        .with_payload("note_id", note.id.clone())
        .with_payload("title", note.title.clone())
}

/// The built-in notes plugin.
pub struct NotesPlugin {
    store: Arc<NoteStore>,
    stop: Mutex<CancellationToken>,
}

impl NotesPlugin {
    /// Create an empty notebook.
    pub fn new() -> Self {
        Self { store: Arc::new(NoteStore::new()), stop: Mutex::new(CancellationToken::new()) }
    }

    /// Create a notebook seeded with two sample notes.
    pub fn with_samples() -> Self {
        let plugin = Self::new();
        let now = Utc::now();
        plugin.store.insert(
            "Example Note",
            "This is an example note from the notes plugin.",
            now - Duration::hours(24),
        );
        plugin.store.insert("Another Note", "Plugins can expose any entity type.", now - Duration::hours(2));
        plugin
    }

    /// Create a note, streaming a `note.created` event when live.
    pub fn add_note(&self, title: &str, content: &str) -> Note {
        let note = self.store.insert(title, content, Utc::now());
        self.store.publish(note_event("note.created", &note));
        note
    }

    pub fn notes(&self) -> Vec<Note> {
        self.store.all()
    }

    /// Whether a live event stream is accepting note events.
    pub fn is_streaming(&self) -> bool {
        self.store.is_streaming()
    }

    fn hooks_file(dir: &Path) -> PathBuf {
        dir.join(HOOKS_DIR).join(format!("{}.json", NOTES_PLUGIN))
    }
}

impl Default for NotesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for NotesPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(NOTES_PLUGIN, crate::VERSION)
            .with_description("In-memory notes exposed as entities, commands and events")
            .core()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::EntityProvider,
            Capability::EntityUpdater,
            Capability::CommandProvider,
            Capability::EventEmitter,
            Capability::HookProvider,
        ]
    }

    fn as_entity_provider(self: Arc<Self>) -> Option<Arc<dyn EntityProvider>> {
        Some(self)
    }

    fn as_entity_updater(self: Arc<Self>) -> Option<Arc<dyn EntityUpdater>> {
        Some(self)
    }

    fn as_command_provider(self: Arc<Self>) -> Option<Arc<dyn CommandProvider>> {
        Some(self)
    }

    fn as_event_emitter(self: Arc<Self>) -> Option<Arc<dyn EventEmitter>> {
        Some(self)
    }

    fn as_hook_provider(self: Arc<Self>) -> Option<Arc<dyn HookProvider>> {
        Some(self)
    }
}

#[async_trait]
impl EntityProvider for NotesPlugin {
    fn entity_types(&self) -> Vec<EntityTypeInfo> {
        vec![EntityTypeInfo::new(NOTE_TYPE, "Note")
            .with_icon("📝")
            .with_description("A text note")
            .with_capabilities(&["IExtensible"])]
    }

    async fn query(&self, query: &EntityQuery) -> PluginResult<Vec<Entity>> {
        if query.entity_type.as_deref().is_some_and(|t| t != NOTE_TYPE) {
            return Ok(Vec::new());
        }
        Ok(query.apply(self.store.all().iter().map(Note::to_entity).collect()))
    }

    async fn get_entity(&self, id: &str) -> PluginResult<Entity> {
        self.store.get(id).map(|note| note.to_entity())
    }
}

#[async_trait]
impl EntityUpdater for NotesPlugin {
    fn entity_types(&self) -> Vec<String> {
        vec![NOTE_TYPE.to_string()]
    }

    async fn update_entity(&self, id: &str, fields: HashMap<String, Value>) -> PluginResult<Entity> {
        let note = self.store.update(id, &fields)?;
        self.store.publish(note_event("note.updated", &note));
        Ok(note.to_entity())
    }
}

impl CommandProvider for NotesPlugin {
    fn commands(&self) -> Vec<Arc<dyn Command>> {
        let store = &self.store;
        vec![
            Arc::new(ListCommand { store: Arc::clone(store) }),
            Arc::new(ShowCommand { store: Arc::clone(store) }),
            Arc::new(AddCommand { store: Arc::clone(store) }),
            Arc::new(EditCommand { store: Arc::clone(store) }),
        ]
    }
}

#[async_trait]
impl EventEmitter for NotesPlugin {
    async fn start_event_stream(
        &self,
        token: CancellationToken,
        events: mpsc::Sender<PluginEvent>,
    ) -> PluginResult<()> {
        let Ok(mut inbox) = self.store.inbox.try_lock() else {
            return Err(PluginError::AlreadyRunning("notes event stream".to_string()));
        };
        let stop = {
            let mut stop = self.stop.lock();
            *stop = CancellationToken::new();
            stop.clone()
        };

        let started = PluginEvent::new("notes.stream_started", NOTES_PLUGIN)
            .with_payload("note_count", self.store.all().len());
        tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            sent = events.send(started) => {
                sent.map_err(|e| PluginError::EventStream(e.to_string()))?;
            }
        }
        self.store.set_streaming(true);

        let mut pending = None;
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = token.cancelled() => break,
                queued = inbox.recv() => {
                    let Some(event) = queued else { break };
                    if let Err(event) = forward(event, &events, &token).await {
                        pending = Some(event);
                        break;
                    }
                }
            }
        }

        // From here on commands persist their events directly.
        self.store.set_streaming(false);

        // Forward what was queued before the stop; a cancelled or closed
        // stream keeps the rest for the next start.
        let mut next = pending.or_else(|| inbox.try_recv().ok());
        while let Some(event) = next {
            if let Err(event) = forward(event, &events, &token).await {
                self.store.requeue(event, &mut inbox);
                break;
            }
            next = inbox.try_recv().ok();
        }
        Ok(())
    }

    /// Ask the stream to stop and wait until it has forwarded its queue.
    async fn stop_event_stream(&self) -> PluginResult<()> {
        self.stop.lock().cancel();
        drop(self.store.inbox.lock().await);
        Ok(())
    }
}

impl HookProvider for NotesPlugin {
    fn hooks(&self) -> Vec<HookConfiguration> {
        vec![HookConfiguration {
            trigger_type: "trigger.session.end".to_string(),
            name: "SessionEnd".to_string(),
            description: "Record a note when an agent session ends".to_string(),
            command: format!("{} {} add \"Session ended\"", crate::APP_ALIAS, NOTES_PLUGIN),
            timeout_secs: 10,
        }]
    }

    fn install_hooks(&self, dir: &Path) -> PluginResult<()> {
        let path = Self::hooks_file(dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.hooks())?)?;
        tracing::debug!(path = ?path, "Installed notes hooks");
        Ok(())
    }

    fn refresh_hooks(&self, dir: &Path) -> PluginResult<()> {
        self.install_hooks(dir)
    }
}

struct ListCommand {
    store: Arc<NoteStore>,
}

#[async_trait]
impl Command for ListCommand {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List all notes"
    }

    fn usage(&self) -> &str {
        "list [--limit N]"
    }

    async fn execute(&self, ctx: &mut CommandContext, args: &[String]) -> PluginResult<()> {
        let limit = match args {
            [] => 0,
            [flag, n] if flag == "--limit" => n
                .parse()
                .map_err(|_| PluginError::InvalidArgument(format!("invalid limit: {}", n)))?,
            _ => return Err(PluginError::InvalidArgument(format!("usage: {}", self.usage()))),
        };

        let notes = EntityQuery::all().with_limit(limit).paginate(self.store.all());
        let out = ctx.stdout();
        if notes.is_empty() {
            writeln!(out, "No notes")?;
            return Ok(());
        }
        for note in notes {
            writeln!(out, "{:<10} {}", note.id, note.title)?;
        }
        Ok(())
    }
}

struct ShowCommand {
    store: Arc<NoteStore>,
}

#[async_trait]
impl Command for ShowCommand {
    fn name(&self) -> &str {
        "show"
    }

    fn description(&self) -> &str {
        "Show a note"
    }

    fn usage(&self) -> &str {
        "show <id>"
    }

    async fn execute(&self, ctx: &mut CommandContext, args: &[String]) -> PluginResult<()> {
        let [id] = args else {
            return Err(PluginError::InvalidArgument(format!("usage: {}", self.usage())));
        };
        let note = self.store.get(id)?;

        let out = ctx.stdout();
        writeln!(out, "{}: {}", note.id, note.title)?;
        writeln!(out, "created: {}", note.created_at.to_rfc3339())?;
        writeln!(out, "updated: {}", note.updated_at.to_rfc3339())?;
        writeln!(out)?;
        writeln!(out, "{}", note.content)?;
        Ok(())
    }
}

struct AddCommand {
    store: Arc<NoteStore>,
}

#[async_trait]
impl Command for AddCommand {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Create a note"
    }

    fn usage(&self) -> &str {
        "add <title> [content...]"
    }

    fn help(&self) -> &str {
        "The remaining arguments are joined with spaces to form the content.\n\
         A note.created event is recorded for every new note."
    }

    async fn execute(&self, ctx: &mut CommandContext, args: &[String]) -> PluginResult<()> {
        let Some((title, content)) = args.split_first() else {
            return Err(PluginError::InvalidArgument(format!("usage: {}", self.usage())));
        };

        let note = self.store.insert(title, &content.join(" "), Utc::now());
        let event = note_event("note.created", &note);
        if !self.store.publish(event.clone()) {
            ctx.emit_event(event).await?;
        }

        writeln!(ctx.stdout(), "Created {}", note.id)?;
        Ok(())
    }
}

struct EditCommand {
    store: Arc<NoteStore>,
}

#[async_trait]
impl Command for EditCommand {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a note's title or content"
    }

    fn usage(&self) -> &str {
        "edit <id> <field>=<value>..."
    }

    fn help(&self) -> &str {
        "Fields: title, content"
    }

    async fn execute(&self, ctx: &mut CommandContext, args: &[String]) -> PluginResult<()> {
        let Some((id, assignments)) = args.split_first().filter(|(_, rest)| !rest.is_empty())
        else {
            return Err(PluginError::InvalidArgument(format!("usage: {}", self.usage())));
        };

        let mut fields = HashMap::new();
        for assignment in assignments {
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                PluginError::InvalidArgument(format!("expected field=value, got {}", assignment))
            })?;
            fields.insert(key.to_string(), Value::from(value));
        }

        let note = self.store.update(id, &fields)?;
        let event = note_event("note.updated", &note);
        if !self.store.publish(event.clone()) {
            ctx.emit_event(event).await?;
        }

        writeln!(ctx.stdout(), "Updated {}", note.id)?;
        Ok(())
    }
}
