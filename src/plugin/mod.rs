//! Plugin system for sessionscope.
//!
//! Plugins are in-process values implementing [`Plugin`] plus any of the
//! capability traits. The [`PluginRegistry`] validates declared capabilities at
//! registration and routes entity, command and update operations to the plugin
//! that owns them.
//!
//! # Capabilities
//!
//! - **IEntityProvider**: queryable entities of one or more types
//! - **IEntityUpdater**: field updates on owned entity types
//! - **ICommandProvider**: commands exposed as `ssc <plugin> <command>`
//! - **IEventEmitter**: a live event stream fanned into the event log
//! - **IHookProvider**: hook installation into the host environment

mod context;
mod error;
mod registry;
mod traits;
mod types;

pub use context::{CommandContext, HostContext, OutputBuffer, PluginContext};
pub use error::{ErrorKind, PluginError, PluginResult};
pub use registry::{HookReport, PluginRegistry, RegisteredEmitter};
pub use traits::{
    Command, CommandProvider, EntityProvider, EntityUpdater, EventEmitter, HookProvider, Plugin,
};
pub use types::{Capability, Entity, EntityQuery, EntityTypeInfo, HookConfiguration, PluginInfo};
