#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_self)]
#![allow(clippy::cast_possible_truncation)]

//! # sessionscope
//!
//! Plugin kernel for agent-session observability.
//!
//! Independently written plugins supply queryable entities, CLI commands, hook
//! installation and live event streams. The kernel validates what each plugin
//! declares, routes operations to the owning plugin and fans every event
//! stream into one persisted log.
//!
//! ## Features
//!
//! - **Capability registry**: declared capabilities are checked at registration
//! - **Entity routing**: typed queries go to the owning plugin, untyped queries fan out
//! - **Plugin commands**: `ssc <plugin> <command>` with cached lookup and `--help`
//! - **Event fan-in**: one producer per emitter, one collector, bounded backpressure
//!
//! ## Quick Start
//!
//! ```bash
//! # List plugins and their capabilities
//! ssc plugins
//!
//! # Run a plugin command with event capture
//! ssc exec notes add "Standup" "talk about the release"
//!
//! # Show recent events
//! ssc logs
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::future_not_send)]

pub mod app;
pub mod core;
pub mod plugin;
pub mod plugins;

// Re-export commonly used types
pub use app::Services;
pub use core::{
    CommandRegistry, Config, DispatcherConfig, DispatcherMetrics, Event, EventDispatcher,
    EventRepository, JsonlEventRepository, MemoryEventRepository, PluginEvent,
};
pub use plugin::{
    Capability, Command, CommandContext, CommandProvider, Entity, EntityProvider, EntityQuery,
    EntityTypeInfo, EntityUpdater, EventEmitter, HookProvider, Plugin, PluginContext, PluginError,
    PluginInfo, PluginRegistry, PluginResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "sessionscope";

/// Short alias
pub const APP_ALIAS: &str = "ssc";
