//! Core runtime for sessionscope.
//!
//! This module contains the event model, event persistence, command routing,
//! the concurrent event dispatcher and configuration.

mod commands;
mod config;
mod dispatcher;
mod event;
mod repository;

pub use commands::{CommandRegistry, NO_COMMANDS_MESSAGE};
pub use config::{
    Config, DispatcherSettings, GeneralConfig, StorageConfig, EVENTS_FILE_NAME, LOCAL_CONFIG_FILE,
};
pub use dispatcher::{DispatcherConfig, DispatcherMetrics, EventDispatcher, DEFAULT_CHANNEL_CAPACITY};
pub use event::{Event, PluginEvent, EVENT_SCHEMA_VERSION, SESSION_ID_KEY};
pub use repository::{EventRepository, JsonlEventRepository, MemoryEventRepository};
