//! Event types.
//!
//! Plugins emit [`PluginEvent`]s; the host normalizes each one into a stored
//! [`Event`] before handing it to the repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Schema version written with every stored event.
pub const EVENT_SCHEMA_VERSION: &str = "1.0";

/// Metadata key carrying the agent session identifier.
pub const SESSION_ID_KEY: &str = "session_id";

/// An event emitted by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEvent {
    /// Namespaced event type, e.g. "tool.invoked".
    #[serde(rename = "type")]
    pub event_type: String,
    /// Name of the emitting plugin.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Context such as `session_id`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PluginEvent {
    /// Create an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            payload: Map::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Session identifier from metadata, if present.
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get(SESSION_ID_KEY).map(String::as_str)
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub session_id: String,
    pub payload: Value,
    /// Normalized text for full-text search.
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    EVENT_SCHEMA_VERSION.to_string()
}

impl Event {
    /// Normalize a plugin event into its stored form.
    ///
    /// The payload keeps the emitting plugin under `source`, the plugin payload
    /// under `data` and any metadata under `metadata`.
    pub fn from_plugin_event(event: PluginEvent) -> Self {
        let session_id = event.session_id().unwrap_or_default().to_string();
        let content = normalize_content(&event);

        let mut payload = json!({
            "source": event.source,
            "data": Value::Object(event.payload),
        });
        if !event.metadata.is_empty() {
            payload["metadata"] = json!(event.metadata);
        }

        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: event.timestamp,
            event_type: event.event_type,
            session_id,
            payload,
            content,
            version: default_version(),
        }
    }

    /// Source plugin recorded in the payload.
    pub fn source(&self) -> Option<&str> {
        self.payload.get("source").and_then(Value::as_str)
    }
}

fn normalize_content(event: &PluginEvent) -> String {
    let mut parts = vec![event.event_type.clone(), event.source.clone()];
    for value in event.payload.values() {
        match value {
            Value::String(s) => parts.push(s.clone()),
            other => parts.push(other.to_string()),
        }
    }
    parts.join(" ")
}
