//! Plugin system error types.

use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Broad classification of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A name or entity type is already claimed.
    RegistrationConflict,
    /// A declared capability is not backed by an implementation.
    CapabilityMismatch,
    /// A plugin, command, entity or provider lookup missed.
    NotFound,
    /// The dispatcher was driven through an invalid state transition.
    LifecycleMisuse,
    /// Anything raised by a plugin or the host while doing work.
    Failure,
}

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin name already registered.
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// Entity type already owned by another plugin.
    #[error("entity type {entity_type} already provided by plugin {owner}")]
    EntityTypeConflict { entity_type: String, owner: String },

    /// Declared capability without a matching implementation.
    #[error("plugin {plugin} declares {capability} capability but doesn't implement it")]
    CapabilityMismatch { plugin: String, capability: String },

    /// Capability tag that is not part of the plugin API.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Plugin not registered.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// No plugin provides the entity type.
    #[error("no plugin found for entity type: {0}")]
    NoProvider(String),

    /// Plugin exists but does not provide commands.
    #[error("no command provider for plugin: {0}")]
    NoCommandProvider(String),

    /// Command missing from the plugin's command set.
    #[error("command not found: {plugin} {command}")]
    CommandNotFound { plugin: String, command: String },

    /// No provider returned the entity.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// No updater accepted the update.
    #[error("entity not found or not updatable: {0}")]
    NotUpdatable(String),

    /// Dispatcher (or emitter) already running.
    #[error("{0} is already running")]
    AlreadyRunning(String),

    /// Dispatcher stopped or never started.
    #[error("{0} is not running")]
    NotRunning(String),

    /// Dispatcher reached its terminal state.
    #[error("{0} has already been stopped and cannot be restarted")]
    Terminated(String),

    /// Tasks were requested outside of a Tokio runtime.
    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    /// Invalid argument passed to a plugin.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Plugin execution failed.
    #[error("plugin execution failed: {0}")]
    Execution(String),

    /// Event stream failed.
    #[error("event stream error: {0}")]
    EventStream(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by plugin code through `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered(_) | Self::EntityTypeConflict { .. } => {
                ErrorKind::RegistrationConflict
            }
            Self::CapabilityMismatch { .. } | Self::UnknownCapability(_) => {
                ErrorKind::CapabilityMismatch
            }
            Self::NotFound(_)
            | Self::NoProvider(_)
            | Self::NoCommandProvider(_)
            | Self::CommandNotFound { .. }
            | Self::EntityNotFound(_)
            | Self::NotUpdatable(_) => ErrorKind::NotFound,
            Self::AlreadyRunning(_)
            | Self::NotRunning(_)
            | Self::Terminated(_)
            | Self::NoRuntime(_) => ErrorKind::LifecycleMisuse,
            Self::InvalidArgument(_)
            | Self::Execution(_)
            | Self::EventStream(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Other(_) => ErrorKind::Failure,
        }
    }

    /// Whether this is a lookup miss.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
