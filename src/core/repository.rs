//! Event persistence.
//!
//! The dispatcher only needs [`EventRepository::save`]. Two sinks ship with the
//! crate: an in-memory log and an append-only JSON-lines file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use super::Event;
use crate::plugin::PluginResult;

/// Sink for persisted events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist a single event.
    async fn save(&self, event: &Event) -> PluginResult<()>;
}

/// In-memory event log.
#[derive(Debug, Default)]
pub struct MemoryEventRepository {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Snapshot of stored events in save order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Stored events of one type.
    pub fn find_by_type(&self, event_type: &str) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.event_type == event_type).cloned().collect()
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn save(&self, event: &Event) -> PluginResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Append-only JSON-lines event log.
#[derive(Debug)]
pub struct JsonlEventRepository {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlEventRepository {
    /// Open (or prepare) the log at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> PluginResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path, write_lock: tokio::sync::Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event in the log. A missing file is an empty log.
    pub fn read_all(&self) -> PluginResult<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        path = ?self.path,
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed event line"
                    );
                }
            }
        }
        Ok(events)
    }

    /// The most recent `limit` events, oldest first.
    pub fn tail(&self, limit: usize) -> PluginResult<Vec<Event>> {
        let events = self.read_all()?;
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl EventRepository for JsonlEventRepository {
    async fn save(&self, event: &Event) -> PluginResult<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file =
            tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PluginEvent;
    use tempfile::TempDir;

    fn event(event_type: &str) -> Event {
        Event::from_plugin_event(PluginEvent::new(event_type, "test").with_payload("n", 1))
    }

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryEventRepository::new();
        assert!(repo.is_empty());

        repo.save(&event("a.created")).await.unwrap();
        repo.save(&event("a.updated")).await.unwrap();
        repo.save(&event("a.created")).await.unwrap();

        assert_eq!(repo.len(), 3);
        assert_eq!(repo.find_by_type("a.created").len(), 2);
        assert_eq!(repo.events()[1].event_type, "a.updated");
    }

    #[tokio::test]
    async fn test_jsonl_save_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("events.jsonl");
        let repo = JsonlEventRepository::open(&path).unwrap();

        assert!(repo.read_all().unwrap().is_empty());

        let first = event("note.created");
        repo.save(&first).await.unwrap();
        repo.save(&event("note.updated")).await.unwrap();

        let events = repo.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], first);
        assert_eq!(events[1].event_type, "note.updated");

        let tail = repo.tail(1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, "note.updated");
    }

    #[tokio::test]
    async fn test_jsonl_skips_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let repo = JsonlEventRepository::open(&path).unwrap();

        repo.save(&event("ok.one")).await.unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not json\n");
        std::fs::write(&path, content).unwrap();
        repo.save(&event("ok.two")).await.unwrap();

        let events = repo.read_all().unwrap();
        assert_eq!(events.len(), 2);
    }
}
