//! Clap derive structures for the `twinsync` CLI.
//!
//! Defines the command tree, global flags, and shared value parsers.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use twinsync_config::TwinBinding;
use twinsync_core::{ModelSelector, PLACEHOLDER};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// twinsync -- digital-twin telemetry tools
#[derive(Debug, Parser)]
#[command(
    name = "twinsync",
    version,
    about = "Inspect twin keys and schemas, and replay device telemetry",
    long_about = "Tools around the twinsync synchronization core.\n\n\
        Compute data-sync keys and model ids, validate a schema directory,\n\
        and replay recorded (topic, payload) telemetry through a dispatcher.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TWINSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Schema directory (overrides config)
    #[arg(long, env = "TWINSYNC_SCHEMA_DIR", global = true)]
    pub schema_dir: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TWINSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compute the data-sync key for a device and location
    Key(KeyArgs),

    /// Map telemetry type ids to model selectors and ids
    #[command(alias = "model")]
    ModelId(ModelIdArgs),

    /// Load and validate a schema directory
    Schemas(SchemasArgs),

    /// Feed recorded telemetry through a dispatcher and print the result
    Replay(ReplayArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Key ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Device id
    pub device: String,

    /// Location id
    #[arg(default_value = PLACEHOLDER)]
    pub location: String,

    /// Qualify the key with a fresh GUID instead of the placeholder
    #[arg(long)]
    pub guid: bool,
}

// ── Model id ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ModelIdArgs {
    /// Telemetry type ids; lists the full mapping when omitted
    pub type_ids: Vec<i32>,
}

// ── Schemas ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SchemasArgs {
    /// Schema directory (overrides --schema-dir and config)
    pub dir: Option<PathBuf>,

    /// Fail unless every selector loads and all references resolve
    #[arg(long)]
    pub strict: bool,
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON-lines file of {"topic": ..., "payload": ...} records ('-' for stdin)
    pub file: PathBuf,

    /// Extra twin binding DEVICE:LOCATION:SELECTOR (repeatable)
    #[arg(long = "twin", value_parser = parse_twin_binding)]
    pub twins: Vec<TwinBinding>,

    /// Ignore twin bindings from the config file
    #[arg(long)]
    pub no_config_twins: bool,

    /// Which result to print
    #[arg(long, default_value = "all")]
    pub show: ReplayView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReplayView {
    /// Twins and connection records
    All,
    /// Twin properties only
    Twins,
    /// Connection records only
    Connections,
}

/// Parse `DEVICE:LOCATION:SELECTOR`. An empty location means the
/// placeholder.
pub fn parse_twin_binding(s: &str) -> Result<TwinBinding, String> {
    let mut parts = s.splitn(3, ':');
    let (Some(device), Some(location), Some(selector)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected DEVICE:LOCATION:SELECTOR, got '{s}'"));
    };
    if device.trim().is_empty() {
        return Err("device must not be empty".into());
    }
    let selector = ModelSelector::from_name(selector).map_err(|e| e.to_string())?;
    let location = if location.trim().is_empty() {
        PLACEHOLDER
    } else {
        location
    };

    Ok(TwinBinding {
        device: device.to_owned(),
        location: location.to_owned(),
        selector,
    })
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_twin_bindings() {
        let binding = parse_twin_binding("edgedevice001:LocationA:EnvSensors").unwrap();
        assert_eq!(binding.device, "edgedevice001");
        assert_eq!(binding.location, "LocationA");
        assert_eq!(binding.selector, ModelSelector::EnvSensors);

        let binding = parse_twin_binding("hvac::Thermostat").unwrap();
        assert_eq!(binding.location, PLACEHOLDER);
    }

    #[test]
    fn rejects_malformed_bindings() {
        assert!(parse_twin_binding("only-device").is_err());
        assert!(parse_twin_binding(":LocationA:EnvSensors").is_err());
        assert_eq!(
            parse_twin_binding("d:l:Toaster").unwrap_err(),
            "Unknown model selector: Toaster"
        );
    }

    #[test]
    fn command_tree_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
