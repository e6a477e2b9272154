//! CLI-specific config helpers: `--config` and `--schema-dir` overrides
//! on top of the shared `twinsync-config` loader.

use std::path::PathBuf;

pub use twinsync_config::{Config, save_config_to};
use twinsync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `TWINSYNC_CONFIG`, else the
/// platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(twinsync_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(twinsync_config::load_config_from(&config_path(global))?)
}

/// Dispatcher settings with the `--schema-dir` override applied.
pub fn sync_config(cfg: &Config, global: &GlobalOpts) -> SyncConfig {
    cfg.sync_config(global.schema_dir.as_deref())
}
