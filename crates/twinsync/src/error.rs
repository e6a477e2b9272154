//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use twinsync_config::ConfigError;
use twinsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const SCHEMA: i32 = 5;
    pub const CONFIG: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Schemas ──────────────────────────────────────────────────────

    #[error("No schema directory configured")]
    #[diagnostic(
        code(twinsync::no_schema_dir),
        help(
            "Pass a directory: twinsync schemas <DIR>\n\
             Or use --schema-dir, TWINSYNC_SCHEMA_DIR, or sync.schema_dir in {path}"
        )
    )]
    NoSchemaDir { path: String },

    #[error("Schema check failed: {summary}")]
    #[diagnostic(
        code(twinsync::schemas_incomplete),
        help("Each selector needs <Selector>.json in the schema directory, and every 'extends' target must load.")
    )]
    SchemasIncomplete { summary: String },

    #[error("Schema error: {message}")]
    #[diagnostic(code(twinsync::schema))]
    Schema { message: String },

    // ── Replay input ─────────────────────────────────────────────────

    #[error("Invalid replay record on line {line}: {reason}")]
    #[diagnostic(
        code(twinsync::replay_input),
        help("Each line must be a JSON object with a 'topic' string and a 'payload' object or string.")
    )]
    ReplayInput { line: usize, reason: String },

    // ── Dispatch ─────────────────────────────────────────────────────

    #[error("Dispatch failed: {message}")]
    #[diagnostic(code(twinsync::dispatch))]
    Dispatch { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(twinsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(twinsync::config),
        help("Inspect the effective configuration with: twinsync config show")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(twinsync::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(twinsync::json))]
    Json(#[from] serde_json::Error),

    #[error("Serialization failed: {message}")]
    #[diagnostic(code(twinsync::serialize))]
    Serialize { message: String },
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::ReplayInput { .. } => exit_code::USAGE,
            Self::NoSchemaDir { .. } | Self::SchemasIncomplete { .. } | Self::Schema { .. } => {
                exit_code::SCHEMA
            }
            Self::Config(_) | Self::ConfigExists { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SchemaRead { .. } | CoreError::SchemaParse { .. } => CliError::Schema {
                message: err.to_string(),
            },

            CoreError::UnknownSelector { name } => CliError::Validation {
                field: "selector".into(),
                reason: format!("unknown model selector '{name}'"),
            },

            CoreError::DispatcherUnavailable
            | CoreError::Codec { .. }
            | CoreError::Topic { .. }
            | CoreError::Transport { .. } => CliError::Dispatch {
                message: err.to_string(),
            },
        }
    }
}
