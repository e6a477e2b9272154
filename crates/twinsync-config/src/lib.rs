//! Shared configuration for twinsync tools.
//!
//! TOML file + `TWINSYNC_` environment loading, validation, and
//! translation to `twinsync_core::SyncConfig`, transport retry settings
//! and twin bindings. The CLI layers its flag overrides on top.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use twinsync_api::{RetryConfig, Topic};
use twinsync_core::{DataSyncKey, ModelSelector, PLACEHOLDER, SyncConfig, compute_data_sync_key};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    /// Twins to create at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub twins: Vec<TwinBinding>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Extra device ids to keep out of the known-device set. The key
    /// placeholder is always denied.
    #[serde(default)]
    pub device_deny_list: Vec<String>,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// Directory holding `<Selector>.json` schema files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_dir: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let core = SyncConfig::default();
        Self {
            device_deny_list: Vec::new(),
            event_channel_capacity: core.event_channel_capacity,
            ingest_queue_capacity: core.ingest_queue_capacity,
            schema_dir: None,
        }
    }
}

fn default_event_channel_capacity() -> usize {
    SyncConfig::default().event_channel_capacity
}
fn default_ingest_queue_capacity() -> usize {
    SyncConfig::default().ingest_queue_capacity
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransportSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// First topic segment.
    #[serde(default = "default_product")]
    pub product: String,

    /// Second topic segment.
    #[serde(default = "default_device_class")]
    pub device_class: String,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Unset means retry forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            product: default_product(),
            device_class: default_device_class(),
            retry_delay_secs: default_retry_delay_secs(),
            max_retries: None,
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_product() -> String {
    "twinsync".into()
}
fn default_device_class() -> String {
    "EdgeDevice".into()
}
fn default_retry_delay_secs() -> u64 {
    5
}

/// A twin created at startup and bound to `device`/`location`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TwinBinding {
    pub device: String,

    #[serde(default = "default_location")]
    pub location: String,

    pub selector: ModelSelector,
}

fn default_location() -> String {
    PLACEHOLDER.into()
}

impl TwinBinding {
    pub fn data_sync_key(&self) -> DataSyncKey {
        compute_data_sync_key(&self.device, &self.location, false)
    }
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.event_channel_capacity == 0 {
            return Err(invalid("sync.event_channel_capacity", "must be at least 1"));
        }
        if self.sync.ingest_queue_capacity == 0 {
            return Err(invalid("sync.ingest_queue_capacity", "must be at least 1"));
        }
        self.transport.validate()?;
        for (i, twin) in self.twins.iter().enumerate() {
            if twin.device.trim().is_empty() {
                return Err(invalid(&format!("twins[{i}].device"), "must not be empty"));
            }
        }
        Ok(())
    }

    /// Core dispatcher settings. `schema_dir` overrides the file value
    /// when given.
    pub fn sync_config(&self, schema_dir: Option<&Path>) -> SyncConfig {
        SyncConfig {
            device_deny_list: self.sync.denied_devices(),
            event_channel_capacity: self.sync.event_channel_capacity,
            ingest_queue_capacity: self.sync.ingest_queue_capacity,
            schema_dir: schema_dir
                .map(Path::to_path_buf)
                .or_else(|| self.sync.schema_dir.clone()),
        }
    }
}

impl TransportSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("transport.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("transport.port", "must be non-zero"));
        }
        for (field, value) in [
            ("transport.product", &self.product),
            ("transport.device_class", &self.device_class),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(invalid(field, format!("'{value}' is not a single topic segment")));
            }
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_retries: self.max_retries,
        }
    }

    /// Filter matching every message kind for the configured product
    /// and device class.
    pub fn subscription_filter(&self) -> String {
        Topic::wildcard(&self.product, &self.device_class)
    }

    /// `host:port` of the broker.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SyncSettings {
    /// Effective deny-list, placeholder included.
    pub fn denied_devices(&self) -> BTreeSet<String> {
        SyncConfig::default()
            .with_denied_devices(
                self.device_deny_list
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty()),
            )
            .device_deny_list
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "twinsync", "twinsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("twinsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load and validate config from `path` + environment. A missing file
/// yields the defaults.
///
/// Nested keys in the environment use a double underscore, e.g.
/// `TWINSYNC_TRANSPORT__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TWINSYNC_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
[sync]
device_deny_list = ["simulator"]
ingest_queue_capacity = 64
schema_dir = "/opt/twinsync/schemas"

[transport]
host = "broker.local"
device_class = "ConstrainedDevice"
retry_delay_secs = 2
max_retries = 3

[[twins]]
device = "edgedevice001"
location = "LocationA"
selector = "EnvSensors"

[[twins]]
device = "hvac"
selector = "Thermostat"
"#;

    fn write(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.transport.port, 1883);
        assert_eq!(config.sync.event_channel_capacity, 256);
        assert!(config.twins.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let (_dir, path) = write(SAMPLE);
        let config = load_config_from(&path).unwrap();

        assert_eq!(config.transport.host, "broker.local");
        assert_eq!(config.transport.port, 1883);
        assert_eq!(config.sync.ingest_queue_capacity, 64);
        assert_eq!(config.twins.len(), 2);
        assert_eq!(config.twins[0].selector, ModelSelector::EnvSensors);
        assert_eq!(config.twins[1].location, PLACEHOLDER);
        assert_eq!(
            config.twins[0].data_sync_key().as_str(),
            "edgedevice001:LocationA:Not Set"
        );
    }

    #[test]
    fn translates_to_core_and_transport_settings() {
        let (_dir, path) = write(SAMPLE);
        let config = load_config_from(&path).unwrap();

        let sync = config.sync_config(None);
        assert!(sync.is_denied("simulator"));
        assert!(sync.is_denied(PLACEHOLDER));
        assert_eq!(sync.ingest_queue_capacity, 64);
        assert_eq!(sync.schema_dir.as_deref(), Some(Path::new("/opt/twinsync/schemas")));

        let overridden = config.sync_config(Some(Path::new("/tmp/schemas")));
        assert_eq!(overridden.schema_dir.as_deref(), Some(Path::new("/tmp/schemas")));

        let retry = config.transport.retry_config();
        assert_eq!(retry.retry_delay, Duration::from_secs(2));
        assert_eq!(retry.max_retries, Some(3));
        assert_eq!(
            config.transport.subscription_filter(),
            "twinsync/ConstrainedDevice/+"
        );
        assert_eq!(config.transport.endpoint(), "broker.local:1883");
    }

    #[test]
    fn rejects_invalid_values() {
        let (_dir, path) = write("[transport]\nproduct = \"a/b\"\n");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "transport.product"));

        let (_dir, path) = write("[[twins]]\ndevice = \" \"\nselector = \"EnvSensors\"\n");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "twins[0].device"));
    }

    #[test]
    fn unknown_selector_fails_extraction() {
        let (_dir, path) = write("[[twins]]\ndevice = \"x\"\nselector = \"Toaster\"\n");
        assert!(matches!(
            load_config_from(&path).unwrap_err(),
            ConfigError::Figment(_)
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let (_dir, path) = write(SAMPLE);
        let config = load_config_from(&path).unwrap();

        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("nested").join("config.toml");
        save_config_to(&config, &target).unwrap();
        assert_eq!(load_config_from(&target).unwrap(), config);
    }

    #[test]
    fn deny_list_always_keeps_placeholder() {
        let settings = SyncSettings {
            device_deny_list: vec!["sim".into()],
            ..SyncSettings::default()
        };
        let denied = settings.denied_devices();
        assert!(denied.contains(PLACEHOLDER));
        assert!(denied.contains("sim"));
    }
}
