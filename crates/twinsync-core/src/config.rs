// ── Runtime synchronization configuration ──
//
// Tuning for the event dispatcher. Built by the CLI (or any embedding
// process) and handed in; core never reads config files.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::key::PLACEHOLDER;

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_INGEST_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Device ids never added to the known-device set. Always contains
    /// the key placeholder so synthetic envelopes do not show up as devices.
    pub device_deny_list: BTreeSet<String>,
    /// Buffer size of the dispatcher's event broadcast channel.
    pub event_channel_capacity: usize,
    /// Bound of the queue feeding the ingest task.
    pub ingest_queue_capacity: usize,
    /// Where schema files are read from, if anywhere.
    pub schema_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_deny_list: BTreeSet::from([PLACEHOLDER.to_owned()]),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            ingest_queue_capacity: DEFAULT_INGEST_QUEUE_CAPACITY,
            schema_dir: None,
        }
    }
}

impl SyncConfig {
    /// Add extra ids to the deny-list, keeping the placeholder.
    pub fn with_denied_devices<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_deny_list.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = Some(dir.into());
        self
    }

    pub fn is_denied(&self, device_id: &str) -> bool {
        self.device_deny_list.contains(device_id)
    }
}
