//! Plugins that ship with sessionscope.

mod notes;

use std::sync::Arc;

pub use notes::{Note, NotesPlugin, NOTES_PLUGIN, NOTE_TYPE};

use crate::plugin::{PluginRegistry, PluginResult};

/// Register every built-in plugin.
pub fn register_builtin_plugins(registry: &PluginRegistry) -> PluginResult<()> {
    registry.register_plugin(Arc::new(NotesPlugin::with_samples()))?;
    Ok(())
}
