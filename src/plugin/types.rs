//! Core plugin types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PluginError;

/// Information about a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin name (registry key).
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Plugin description.
    #[serde(default)]
    pub description: String,
    /// Whether the plugin ships with the host.
    #[serde(default)]
    pub is_core: bool,
}

impl PluginInfo {
    /// Create plugin info for an external plugin.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), description: String::new(), is_core: false }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark as a core plugin.
    pub fn core(mut self) -> Self {
        self.is_core = true;
        self
    }

    /// "core" or "external".
    pub fn kind(&self) -> &'static str {
        if self.is_core {
            "core"
        } else {
            "external"
        }
    }
}

/// A capability a plugin can declare.
///
/// The serialized form is the capability's interface tag, e.g. `"IEntityProvider"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "IEntityProvider")]
    EntityProvider,
    #[serde(rename = "IEntityUpdater")]
    EntityUpdater,
    #[serde(rename = "ICommandProvider")]
    CommandProvider,
    #[serde(rename = "IEventEmitter")]
    EventEmitter,
    #[serde(rename = "IHookProvider")]
    HookProvider,
}

impl Capability {
    /// Every capability, in validation order.
    pub const ALL: [Self; 5] = [
        Self::EntityProvider,
        Self::EntityUpdater,
        Self::CommandProvider,
        Self::EventEmitter,
        Self::HookProvider,
    ];

    /// The interface tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityProvider => "IEntityProvider",
            Self::EntityUpdater => "IEntityUpdater",
            Self::CommandProvider => "ICommandProvider",
            Self::EventEmitter => "IEventEmitter",
            Self::HookProvider => "IHookProvider",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PluginError::UnknownCapability(s.to_string()))
    }
}

/// Describes an entity type provided by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeInfo {
    /// Unique type name (e.g. "session", "task").
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Singular display name.
    pub display_name: String,
    /// Plural display name.
    #[serde(default)]
    pub display_name_plural: String,
    /// Capability names entities of this type support.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Optional icon for UI displays.
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
}

impl EntityTypeInfo {
    /// Create type info with display names derived from the type name.
    pub fn new(entity_type: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            entity_type: entity_type.into(),
            display_name_plural: format!("{}s", display_name),
            display_name,
            ..Self::default()
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

/// A query for entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityQuery {
    /// Entity type to query; `None` fans out to every provider.
    pub entity_type: Option<String>,
    /// Plugin-specific filters.
    pub filters: Map<String, Value>,
    /// Maximum number of results (0 means no limit).
    pub limit: usize,
    /// Number of results to skip.
    pub offset: usize,
    /// Field to sort by.
    pub sort_by: Option<String>,
    /// Sort descending.
    pub sort_desc: bool,
}

impl EntityQuery {
    /// Query every provider.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query a single entity type.
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self { entity_type: Some(entity_type.into()), ..Self::default() }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.sort_desc = descending;
        self
    }

    /// Check an entity against the equality filters.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.filters.iter().all(|(key, expected)| entity.field(key) == Some(expected))
    }

    /// Apply filters, sorting, offset and limit to a provider's full result set.
    pub fn apply(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut entities: Vec<Entity> = entities.into_iter().filter(|e| self.matches(e)).collect();

        if let Some(field) = &self.sort_by {
            entities.sort_by(|a, b| {
                let left = a.field(field).map(value_sort_key).unwrap_or_default();
                let right = b.field(field).map(value_sort_key).unwrap_or_default();
                left.cmp(&right)
            });
            if self.sort_desc {
                entities.reverse();
            }
        }

        self.paginate(entities)
    }

    /// Apply only offset and limit.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        if self.limit > 0 {
            iter.take(self.limit).collect()
        } else {
            iter.collect()
        }
    }
}

fn value_sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An entity produced by an entity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create an entity with the base `IExtensible` capability.
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            capabilities: vec!["IExtensible".to_string()],
            fields: Map::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a string field value.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// A hook a plugin wants installed into the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfiguration {
    /// Event that triggers the hook (e.g. "trigger.tool.before").
    pub trigger_type: String,
    /// Human-readable name (e.g. "PreToolUse").
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Command executed when the hook fires.
    pub command: String,
    /// Maximum seconds the hook may take (0 = no timeout).
    #[serde(default)]
    pub timeout_secs: u64,
}
