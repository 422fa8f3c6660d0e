//! Plugin command lookup and execution.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::plugin::{Command, CommandContext, PluginError, PluginRegistry, PluginResult};
use crate::APP_ALIAS;

/// Output of [`CommandRegistry::list_commands`] when nothing is registered.
pub const NO_COMMANDS_MESSAGE: &str = "No plugin commands available";

/// Caches each plugin's command set and executes commands.
///
/// A plugin's `commands()` is called once, on the first lookup that touches it.
/// The cache lives as long as the registry; there is no invalidation.
pub struct CommandRegistry {
    plugins: Arc<PluginRegistry>,
    cache: RwLock<HashMap<String, Vec<Arc<dyn Command>>>>,
}

impl CommandRegistry {
    /// Create a command registry over a plugin registry.
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins, cache: RwLock::new(HashMap::new()) }
    }

    /// Commands for a plugin, filling the cache on first use.
    fn load(&self, plugin: &str) -> PluginResult<Vec<Arc<dyn Command>>> {
        if let Some(commands) = self.cache.read().get(plugin) {
            return Ok(commands.clone());
        }

        let provider = self.plugins.command_provider(plugin)?;

        let mut cache = self.cache.write();
        if let Some(commands) = cache.get(plugin) {
            return Ok(commands.clone());
        }
        let commands = provider.commands();
        tracing::debug!(plugin, count = commands.len(), "Cached plugin commands");
        cache.insert(plugin.to_string(), commands.clone());
        Ok(commands)
    }

    /// Look up a command.
    pub fn get_command(&self, plugin: &str, command: &str) -> PluginResult<Arc<dyn Command>> {
        self.load(plugin)?.into_iter().find(|c| c.name() == command).ok_or_else(|| {
            PluginError::CommandNotFound { plugin: plugin.to_string(), command: command.to_string() }
        })
    }

    /// A plugin's commands in declared order. Empty if the plugin is unknown
    /// or has no commands.
    pub fn commands_for_plugin(&self, plugin: &str) -> Vec<Arc<dyn Command>> {
        self.load(plugin).unwrap_or_default()
    }

    /// Commands of every command provider, keyed by plugin name.
    pub fn all_commands(&self) -> BTreeMap<String, Vec<Arc<dyn Command>>> {
        self.plugins
            .all_command_providers()
            .into_iter()
            .filter_map(|(name, _)| {
                let commands = self.commands_for_plugin(&name);
                (!commands.is_empty()).then_some((name, commands))
            })
            .collect()
    }

    /// Human-readable listing of every command.
    pub fn list_commands(&self) -> String {
        let all = self.all_commands();
        if all.is_empty() {
            return NO_COMMANDS_MESSAGE.to_string();
        }

        let mut out = String::from("Available plugin commands:\n\n");
        for (plugin, commands) in &all {
            let _ = writeln!(out, "{}:", plugin);
            for command in commands {
                let _ = writeln!(
                    out,
                    "  {} {} {} - {}",
                    APP_ALIAS,
                    plugin,
                    command.name(),
                    command.description()
                );
                if !command.usage().is_empty() {
                    let _ = writeln!(out, "    Usage: {} {} {}", APP_ALIAS, plugin, command.usage());
                }
            }
            out.push('\n');
        }
        out
    }

    /// Execute a command.
    ///
    /// When `args` contains `--help` or `-h` the command's help is written to
    /// the context's stdout and the command itself does not run. Errors from
    /// the command are returned unchanged.
    pub async fn execute_command(
        &self,
        plugin: &str,
        command: &str,
        args: &[String],
        ctx: &mut CommandContext,
    ) -> PluginResult<()> {
        let cmd = self.get_command(plugin, command)?;

        if args.iter().any(|a| a == "--help" || a == "-h") {
            let help = render_help(plugin, cmd.as_ref());
            ctx.stdout().write_all(help.as_bytes())?;
            ctx.stdout().flush()?;
            return Ok(());
        }

        tracing::debug!(plugin, command, ?args, "Executing plugin command");
        cmd.execute(ctx, args).await
    }
}

fn render_help(plugin: &str, command: &dyn Command) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Command: {} {} {}", APP_ALIAS, plugin, command.name());
    let _ = writeln!(out);
    let _ = writeln!(out, "Description:");
    let _ = writeln!(out, "  {}", command.description());
    if !command.usage().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Usage:");
        let _ = writeln!(out, "  {} {} {}", APP_ALIAS, plugin, command.usage());
    }
    if !command.help().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", command.help().trim_end());
    }
    out
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached: Vec<String> = self.cache.read().keys().cloned().collect();
        f.debug_struct("CommandRegistry").field("cached", &cached).finish_non_exhaustive()
    }
}
