//! sessionscope - plugin kernel for agent-session observability.
//!
//! Lists plugins, entities and commands, runs plugin commands with event
//! capture, and streams plugin events into the event log.

#![allow(clippy::single_match_else)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionscope::core::{Config, JsonlEventRepository};
use sessionscope::plugin::{Entity, EntityQuery};
use sessionscope::{Services, APP_ALIAS, APP_NAME};

/// Plugin kernel for agent-session observability
#[derive(Parser)]
#[command(name = "sessionscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use a specific config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Event log file (overrides the config)
    #[arg(long, global = true, env = "SESSIONSCOPE_EVENTS_FILE")]
    events_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered plugins
    Plugins {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List plugin commands
    Commands {
        /// Only show commands of this plugin
        plugin: Option<String>,
    },

    /// Query entities
    Entities {
        /// Entity type to query (all types when omitted)
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,

        /// Maximum number of entities (0 = no limit)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a single entity
    Entity {
        /// Entity id (e.g. note:1)
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Update fields on an entity
    Update {
        /// Entity id
        id: String,

        /// Field assignments (key=value)
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Run a plugin command with the event dispatcher active
    #[command(disable_help_flag = true)]
    Exec {
        /// Plugin name
        plugin: String,

        /// Command name
        command: String,

        /// Command arguments (`--help` shows the command's help)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Stream plugin events into the event log
    Watch {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Show recent events from the event log
    Logs {
        /// Number of events to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage plugin hooks
    Hooks {
        /// Hooks operation
        #[command(subcommand)]
        operation: HooksOperation,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Shorthand for `exec`: `ssc <plugin> <command> [args...]`
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Subcommand)]
enum HooksOperation {
    /// Install hooks for every hook provider
    Install {
        /// Directory to install into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Re-apply hooks for every hook provider
    Refresh {
        /// Directory to refresh
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    if let Some(events_file) = cli.events_file {
        config.storage.events_file = Some(events_file);
    }

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    // Handle commands
    match cli.command {
        Commands::Plugins { format } => {
            cmd_plugins(&build_services(config)?, &format)?;
        }
        Commands::Commands { plugin } => {
            cmd_commands(&build_services(config)?, plugin.as_deref());
        }
        Commands::Entities { entity_type, limit, format } => {
            cmd_entities(&build_services(config)?, entity_type, limit, &format).await?;
        }
        Commands::Entity { id, format } => {
            cmd_entity(&build_services(config)?, &id, &format).await?;
        }
        Commands::Update { id, fields } => {
            cmd_update(&build_services(config)?, &id, &fields).await?;
        }
        Commands::Exec { plugin, command, args } => {
            cmd_exec(&build_services(config)?, &plugin, &command, &args).await?;
        }
        Commands::External(argv) => {
            let mut argv = argv.into_iter();
            let plugin = argv.next().unwrap_or_default();
            let Some(command) = argv.next() else {
                anyhow::bail!(
                    "Missing command for plugin '{plugin}'. Run `{APP_NAME} commands {plugin}`"
                );
            };
            let args: Vec<String> = argv.collect();
            cmd_exec(&build_services(config)?, &plugin, &command, &args).await?;
        }
        Commands::Watch { seconds } => {
            cmd_watch(&build_services(config)?, seconds).await?;
        }
        Commands::Logs { limit, format } => {
            cmd_logs(&config.events_path(), limit, &format)?;
        }
        Commands::Hooks { operation } => {
            cmd_hooks(&build_services(config)?, operation)?;
        }
        Commands::Config { path } => {
            cmd_config(&config, path)?;
        }
        Commands::Completions { shell } => {
            cmd_completions(shell);
        }
    }

    Ok(())
}

/// Build services writing events to the configured log.
fn build_services(config: Config) -> Result<Services> {
    let path = config.events_path();
    let repository = JsonlEventRepository::open(&path)
        .with_context(|| format!("Failed to open event log {}", path.display()))?;
    let services = Services::new(config, Arc::new(repository))?;
    Ok(services)
}

/// List plugins.
fn cmd_plugins(services: &Services, format: &str) -> Result<()> {
    let plugins = services.registry.all_plugins();

    match format {
        "json" => {
            let list: Vec<Value> = plugins
                .iter()
                .map(|plugin| {
                    let mut value = serde_json::to_value(plugin.info()).unwrap_or_default();
                    value["capabilities"] = json!(plugin.capabilities());
                    value
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        _ => {
            if plugins.is_empty() {
                println!("No plugins registered.");
                return Ok(());
            }
            println!("Registered plugins:\n");
            for plugin in &plugins {
                let info = plugin.info();
                println!("  {} v{} [{}]", info.name, info.version, info.kind());
                if !info.description.is_empty() {
                    println!("      {}", info.description);
                }
                let capabilities: Vec<_> =
                    plugin.capabilities().iter().map(|c| c.as_str()).collect();
                println!("      capabilities: {}", capabilities.join(", "));
            }
            println!("\nTotal: {} plugin(s)", plugins.len());
        }
    }

    Ok(())
}

/// List plugin commands.
fn cmd_commands(services: &Services, plugin: Option<&str>) {
    let Some(plugin) = plugin else {
        println!("{}", services.commands.list_commands().trim_end());
        return;
    };

    let commands = services.commands.commands_for_plugin(plugin);
    if commands.is_empty() {
        println!("No commands for plugin '{plugin}'");
        return;
    }
    for command in commands {
        println!("  {} {} {} - {}", APP_ALIAS, plugin, command.name(), command.description());
    }
}

fn print_entity(entity: &Entity) {
    println!("{} ({})", entity.id, entity.entity_type);
    for (key, value) in &entity.fields {
        match value {
            Value::String(s) => println!("  {key}: {s}"),
            other => println!("  {key}: {other}"),
        }
    }
}

/// Query entities.
async fn cmd_entities(
    services: &Services,
    entity_type: Option<String>,
    limit: usize,
    format: &str,
) -> Result<()> {
    let query = EntityQuery { entity_type, limit, ..EntityQuery::default() };
    let mut entities = services.registry.query(&query).await?;
    // Untyped queries fan out, so the limit applies to the merged result.
    if query.entity_type.is_none() {
        entities = query.paginate(entities);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entities)?),
        _ => {
            for entity in &entities {
                let title = entity
                    .field_str("title")
                    .or_else(|| entity.field_str("name"))
                    .unwrap_or_default();
                println!("{:<16} {:<10} {}", entity.id, entity.entity_type, title);
            }
            println!("\nTotal: {} entities", entities.len());
        }
    }

    Ok(())
}

/// Show one entity.
async fn cmd_entity(services: &Services, id: &str, format: &str) -> Result<()> {
    let entity = services.registry.get_entity(id).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entity)?),
        _ => print_entity(&entity),
    }
    Ok(())
}

/// Parse `key=value` assignments. Values that parse as JSON keep their type.
fn parse_assignments(assignments: &[String]) -> Result<HashMap<String, Value>> {
    assignments
        .iter()
        .map(|assignment| {
            let (key, raw) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Expected key=value, got '{assignment}'"))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
            Ok((key.to_string(), value))
        })
        .collect()
}

/// Update an entity.
async fn cmd_update(services: &Services, id: &str, assignments: &[String]) -> Result<()> {
    let fields = parse_assignments(assignments)?;
    let entity = services.registry.update_entity(id, fields).await?;
    println!("Updated:");
    print_entity(&entity);
    Ok(())
}

/// Execute a plugin command.
async fn cmd_exec(services: &Services, plugin: &str, command: &str, args: &[String]) -> Result<()> {
    let mut ctx = services.command_context();
    let result = services
        .with_dispatcher(CancellationToken::new(), async {
            services.commands.execute_command(plugin, command, args, &mut ctx).await
        })
        .await?;
    io::stdout().flush()?;
    result?;
    Ok(())
}

/// Stream events until Ctrl-C or the timeout.
async fn cmd_watch(services: &Services, seconds: Option<u64>) -> Result<()> {
    let events_file = services.config.events_path();
    println!(
        "Streaming events from {} emitter(s) into {}",
        services.dispatcher.emitter_count(),
        events_file.display()
    );

    services
        .with_dispatcher(CancellationToken::new(), async {
            let timeout = async {
                match seconds {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
                () = timeout => {}
            }
        })
        .await?;

    let metrics = services.dispatcher.metrics();
    println!("Handled {} event(s), {} failed", metrics.events_handled, metrics.events_failed);
    Ok(())
}

/// Show recent events.
fn cmd_logs(path: &Path, limit: usize, format: &str) -> Result<()> {
    let events = JsonlEventRepository::open(path)?.tail(limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&events)?),
        _ => {
            if events.is_empty() {
                println!("No events in {}", path.display());
                return Ok(());
            }
            for event in &events {
                println!(
                    "{}  {:<24} {:<12} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.source().unwrap_or("-"),
                    event.session_id
                );
            }
        }
    }

    Ok(())
}

/// Install or refresh hooks.
fn cmd_hooks(services: &Services, operation: HooksOperation) -> Result<()> {
    if services.registry.hook_providers().is_empty() {
        println!("No hook providers registered.");
        return Ok(());
    }

    let report = match &operation {
        HooksOperation::Install { dir } => services.registry.install_hooks(dir),
        HooksOperation::Refresh { dir } => services.registry.refresh_hooks(dir),
    };

    for plugin in &report.succeeded {
        println!("  ✓ {plugin}");
    }
    for (plugin, error) in &report.failed {
        println!("  ✗ {plugin}: {error}");
    }

    if !report.is_success() {
        anyhow::bail!("{} hook provider(s) failed", report.failed.len());
    }
    Ok(())
}

/// Show configuration.
fn cmd_config(config: &Config, show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let toml = toml::to_string_pretty(config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}
