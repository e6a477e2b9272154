// ── Event dispatcher ──
//
// Receives typed telemetry, keeps the known-device set and per-device
// connection records, routes envelopes to bound twins through the
// manager, and fans every event out to registered listeners and to
// broadcast subscribers.
//
// All mutable state sits behind one `RwLock`: writers are serialized,
// readers run concurrently. Nothing done under the lock awaits or does
// I/O. After `shutdown()` every operation returns
// `CoreError::DispatcherUnavailable`.

mod cell;
mod ingest;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use indexmap::IndexSet;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::handler::TelemetryHandler;
use crate::key::{DataSyncKey, InstanceKey};
use crate::listener::{DataContextListener, LogLevel, SystemStatusListener};
use crate::manager::TwinManager;
use crate::model::{
    ConnectionPhase, DeviceConnectionState, ModelSelector, TelemetryEnvelope, TelemetryKind,
    TwinListener, TwinState,
};
use crate::registry::SchemaLoadReport;
use crate::schema::{FileSchemaStore, SchemaStore};
use crate::stream::EventStream;

pub use cell::DispatcherCell;

// ── Events ───────────────────────────────────────────────────────────

/// Everything the dispatcher fans out, mirrored onto the broadcast
/// channel for async subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    Telemetry {
        envelope: TelemetryEnvelope,
        twins_updated: Vec<InstanceKey>,
    },
    ConnectionChanged {
        from: ConnectionPhase,
        to: ConnectionPhase,
        state: DeviceConnectionState,
    },
    Outgoing {
        instance_key: InstanceKey,
        envelope: TelemetryEnvelope,
    },
    ModelUpdated {
        instance_key: InstanceKey,
        selector: ModelSelector,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// What happened to one incoming envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub data_sync_key: DataSyncKey,
    /// The device id was seen for the first time.
    pub newly_known_device: bool,
    /// Twins that accepted the envelope, in fan-out order.
    pub twins_updated: Vec<InstanceKey>,
    /// Data listeners invoked.
    pub listeners_notified: usize,
    /// The envelope was not processed (kind mismatch on a typed entry point).
    pub ignored: bool,
}

impl DispatchOutcome {
    fn ignored(envelope: &TelemetryEnvelope) -> Self {
        Self {
            data_sync_key: envelope.data_sync_key(),
            newly_known_device: false,
            twins_updated: Vec::new(),
            listeners_notified: 0,
            ignored: true,
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

struct SyncState {
    manager: TwinManager,
    known_devices: IndexSet<String>,
    connections: BTreeMap<String, DeviceConnectionState>,
    data_listeners: Vec<Arc<dyn DataContextListener>>,
    status_listeners: Vec<Arc<dyn SystemStatusListener>>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            manager: TwinManager::new(),
            known_devices: IndexSet::new(),
            connections: BTreeMap::new(),
            data_listeners: Vec::new(),
            status_listeners: Vec::new(),
        }
    }

    fn notify_data(&self, envelope: &TelemetryEnvelope) -> usize {
        let kind = envelope.kind();
        for listener in &self.data_listeners {
            match kind {
                TelemetryKind::Sensor => listener.on_sensor_data(envelope),
                TelemetryKind::Actuator => listener.on_actuator_data(envelope),
                TelemetryKind::SystemPerformance => listener.on_system_performance_data(envelope),
                TelemetryKind::ConnectionState => listener.on_connection_state_data(envelope),
            }
        }
        self.data_listeners.len()
    }

    fn notify_model_update(&self, key: &InstanceKey, selector: ModelSelector) {
        for listener in &self.status_listeners {
            listener.on_model_update(key, selector);
        }
    }
}

// ── EventDispatcher ──────────────────────────────────────────────────

/// Cheaply cloneable handle; all clones share one state.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: SyncConfig,
    state: RwLock<SyncState>,
    shut_down: AtomicBool,
    event_tx: broadcast::Sender<Arc<DispatchEvent>>,
    cancel: CancellationToken,
}

impl EventDispatcher {
    pub fn new(config: SyncConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                state: RwLock::new(SyncState::new()),
                shut_down: AtomicBool::new(false),
                event_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn is_available(&self) -> bool {
        !self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop the dispatcher. Cancels ingest tasks and drops all listeners.
    /// Returns `false` if it was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.cancel.cancel();
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        state.data_listeners.clear();
        state.status_listeners.clear();
        info!(
            twins = state.manager.registry().twin_count(),
            devices = state.known_devices.len(),
            "event dispatcher shut down"
        );
        true
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, SyncState>, CoreError> {
        if !self.is_available() {
            return Err(CoreError::DispatcherUnavailable);
        }
        Ok(self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, SyncState>, CoreError> {
        if !self.is_available() {
            return Err(CoreError::DispatcherUnavailable);
        }
        Ok(self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(Arc::new(event));
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> Result<broadcast::Receiver<Arc<DispatchEvent>>, CoreError> {
        if !self.is_available() {
            return Err(CoreError::DispatcherUnavailable);
        }
        Ok(self.inner.event_tx.subscribe())
    }

    /// [`subscribe`](Self::subscribe) as a `Stream`.
    pub fn event_stream(&self) -> Result<EventStream, CoreError> {
        self.subscribe().map(EventStream::new)
    }

    pub fn register_data_listener(&self, listener: Arc<dyn DataContextListener>) -> Result<(), CoreError> {
        self.write()?.data_listeners.push(listener);
        Ok(())
    }

    pub fn register_status_listener(&self, listener: Arc<dyn SystemStatusListener>) -> Result<(), CoreError> {
        self.write()?.status_listeners.push(listener);
        Ok(())
    }

    pub fn clear_all_listeners(&self) -> Result<(), CoreError> {
        let mut state = self.write()?;
        state.data_listeners.clear();
        state.status_listeners.clear();
        debug!("all listeners cleared");
        Ok(())
    }

    // ── Incoming telemetry ───────────────────────────────────────────

    /// Process one incoming envelope of any kind.
    pub fn on_telemetry(&self, envelope: &TelemetryEnvelope) -> Result<DispatchOutcome, CoreError> {
        let envelope = envelope.clone();
        let mut state = self.write()?;

        let device_id = envelope.device_id.trim();
        let tracked = !device_id.is_empty() && !self.inner.config.is_denied(device_id);
        let mut newly_known_device = false;
        let mut transition = None;
        if tracked {
            newly_known_device = state.known_devices.insert(device_id.to_owned());
            if newly_known_device {
                info!(device_id, "new device seen");
            }
            let record = state
                .connections
                .entry(device_id.to_owned())
                .or_insert_with(|| DeviceConnectionState::new(device_id));
            if let Some((from, to)) = record.merge_incoming(&envelope) {
                debug!(device_id, %from, %to, "device connection phase changed");
                transition = Some((from, to, record.clone()));
            }
        }

        let twins_updated = state.manager.dispatch_incoming(&envelope);
        let listeners_notified = state.notify_data(&envelope);
        if let Some((_, _, record)) = &transition {
            for listener in &state.status_listeners {
                listener.on_connection_state(record);
            }
        }
        drop(state);

        let outcome = DispatchOutcome {
            data_sync_key: envelope.data_sync_key(),
            newly_known_device,
            twins_updated: twins_updated.clone(),
            listeners_notified,
            ignored: false,
        };
        if let Some((from, to, record)) = transition {
            self.emit(DispatchEvent::ConnectionChanged {
                from,
                to,
                state: record,
            });
        }
        self.emit(DispatchEvent::Telemetry {
            envelope,
            twins_updated,
        });
        Ok(outcome)
    }

    pub fn on_sensor_data(&self, envelope: &TelemetryEnvelope) -> Result<DispatchOutcome, CoreError> {
        self.on_kind(TelemetryKind::Sensor, envelope)
    }

    pub fn on_actuator_data(&self, envelope: &TelemetryEnvelope) -> Result<DispatchOutcome, CoreError> {
        self.on_kind(TelemetryKind::Actuator, envelope)
    }

    pub fn on_system_performance_data(
        &self,
        envelope: &TelemetryEnvelope,
    ) -> Result<DispatchOutcome, CoreError> {
        self.on_kind(TelemetryKind::SystemPerformance, envelope)
    }

    pub fn on_connection_state_data(
        &self,
        envelope: &TelemetryEnvelope,
    ) -> Result<DispatchOutcome, CoreError> {
        self.on_kind(TelemetryKind::ConnectionState, envelope)
    }

    fn on_kind(
        &self,
        expected: TelemetryKind,
        envelope: &TelemetryEnvelope,
    ) -> Result<DispatchOutcome, CoreError> {
        if !self.is_available() {
            return Err(CoreError::DispatcherUnavailable);
        }
        let actual = envelope.kind();
        if actual != expected {
            warn!(%expected, %actual, device_id = %envelope.device_id, "telemetry kind mismatch, ignoring");
            return Ok(DispatchOutcome::ignored(envelope));
        }
        self.on_telemetry(envelope)
    }

    // ── Outgoing commands ────────────────────────────────────────────

    /// Route a locally initiated actuator command through the twin, then
    /// to data listeners. Returns whether the twin accepted it.
    pub fn on_outgoing_actuator_command(
        &self,
        instance_key: &InstanceKey,
        envelope: &TelemetryEnvelope,
    ) -> Result<bool, CoreError> {
        let envelope = envelope.clone();
        let mut state = self.write()?;

        if !state.manager.handle_outgoing_state_update(instance_key, &envelope) {
            return Ok(false);
        }
        let device_id = state
            .manager
            .get_twin_state(instance_key)
            .map(|t| t.device_id().to_owned())
            .unwrap_or_default();
        if let Some(record) = state.connections.get_mut(&device_id) {
            record.record_outgoing(Utc::now());
        }
        for listener in &state.data_listeners {
            listener.on_actuator_command(instance_key, &envelope);
        }
        drop(state);

        self.emit(DispatchEvent::Outgoing {
            instance_key: instance_key.clone(),
            envelope,
        });
        Ok(true)
    }

    // ── Logging ──────────────────────────────────────────────────────

    pub fn log_debug(&self, message: &str) -> Result<(), CoreError> {
        self.log(LogLevel::Debug, message)
    }

    pub fn log_warning(&self, message: &str) -> Result<(), CoreError> {
        self.log(LogLevel::Warning, message)
    }

    pub fn log_error(&self, message: &str) -> Result<(), CoreError> {
        self.log(LogLevel::Error, message)
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), CoreError> {
        let state = self.read()?;
        match level {
            LogLevel::Debug => debug!(target: "twinsync::status", "{message}"),
            LogLevel::Warning => warn!(target: "twinsync::status", "{message}"),
            LogLevel::Error => error!(target: "twinsync::status", "{message}"),
        }
        for listener in &state.status_listeners {
            listener.on_log(level, message);
        }
        drop(state);
        self.emit(DispatchEvent::Log {
            level,
            message: message.to_owned(),
        });
        Ok(())
    }

    // ── Twins ────────────────────────────────────────────────────────

    pub fn create_twin_state(
        &self,
        data_key: &DataSyncKey,
        selector: ModelSelector,
        listener: Option<Arc<dyn TwinListener>>,
    ) -> Result<InstanceKey, CoreError> {
        self.create_twin_state_for(data_key.device_id(), data_key.location_id(), selector, listener)
    }

    pub fn create_twin_state_for(
        &self,
        device_id: &str,
        location_id: &str,
        selector: ModelSelector,
        listener: Option<Arc<dyn TwinListener>>,
    ) -> Result<InstanceKey, CoreError> {
        let mut state = self.write()?;
        let key = state
            .manager
            .create_twin_state_for(device_id, location_id, selector, listener);
        state.notify_model_update(&key, selector);
        drop(state);

        self.emit(DispatchEvent::ModelUpdated {
            instance_key: key.clone(),
            selector,
        });
        Ok(key)
    }

    /// Load schemas from `store` in one pass under the write lock and
    /// refresh the twins whose selector loaded.
    pub fn load_schemas(&self, store: &dyn SchemaStore) -> Result<SchemaLoadReport, CoreError> {
        let mut state = self.write()?;
        let report = state.manager.load_schemas_report(store);
        let refreshed: Vec<(InstanceKey, ModelSelector)> = state
            .manager
            .registry()
            .twins()
            .filter(|t| report.loaded.contains(&t.selector()))
            .map(|t| (t.instance_key().clone(), t.selector()))
            .collect();
        for (key, selector) in &refreshed {
            state.notify_model_update(key, *selector);
        }
        drop(state);

        for (instance_key, selector) in refreshed {
            self.emit(DispatchEvent::ModelUpdated {
                instance_key,
                selector,
            });
        }
        Ok(report)
    }

    /// Load from the configured schema directory, if one is set.
    pub fn load_configured_schemas(&self) -> Result<Option<SchemaLoadReport>, CoreError> {
        match &self.inner.config.schema_dir {
            Some(dir) => self.load_schemas(&FileSchemaStore::new(dir)).map(Some),
            None => {
                if !self.is_available() {
                    return Err(CoreError::DispatcherUnavailable);
                }
                Ok(None)
            }
        }
    }

    pub fn register_handler(
        &self,
        type_id: i32,
        handler: Arc<dyn TelemetryHandler>,
    ) -> Result<(), CoreError> {
        self.write()?.manager.register_handler(type_id, handler);
        Ok(())
    }

    /// Move a twin to a new device/location identity. `None` when `key`
    /// is not indexed.
    pub fn rebind_twin_state(
        &self,
        key: &InstanceKey,
        device_id: &str,
        location_id: &str,
    ) -> Result<Option<InstanceKey>, CoreError> {
        Ok(self.write()?.manager.rebind_twin_state(key, device_id, location_id))
    }

    pub fn attach_child(&self, parent: &InstanceKey, child: &InstanceKey) -> Result<bool, CoreError> {
        Ok(self.write()?.manager.attach_child(parent, child))
    }

    pub fn remove_twin_state(&self, key: &InstanceKey) -> Result<Option<TwinState>, CoreError> {
        Ok(self.write()?.manager.remove_twin_state(key))
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Snapshot of one twin.
    pub fn twin_state(&self, key: &InstanceKey) -> Result<Option<TwinState>, CoreError> {
        Ok(self.read()?.manager.get_twin_state(key).cloned())
    }

    /// Snapshots of the twins bound to `data_key`, in fan-out order.
    pub fn lookup(&self, data_key: &DataSyncKey) -> Result<Vec<TwinState>, CoreError> {
        Ok(self
            .read()?
            .manager
            .lookup(data_key)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Run `f` against the manager under the read lock.
    pub fn with_manager<R>(&self, f: impl FnOnce(&TwinManager) -> R) -> Result<R, CoreError> {
        Ok(f(&self.read()?.manager))
    }

    /// Known device ids in the order they were first seen.
    pub fn known_devices(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.read()?.known_devices.iter().cloned().collect())
    }

    pub fn is_known_device(&self, device_id: &str) -> Result<bool, CoreError> {
        Ok(self.read()?.known_devices.contains(device_id))
    }

    pub fn connection_state(&self, device_id: &str) -> Result<Option<DeviceConnectionState>, CoreError> {
        Ok(self.read()?.connections.get(device_id).cloned())
    }

    /// All connection records, ordered by device id.
    pub fn connection_states(&self) -> Result<Vec<DeviceConnectionState>, CoreError> {
        Ok(self.read()?.connections.values().cloned().collect())
    }
}
