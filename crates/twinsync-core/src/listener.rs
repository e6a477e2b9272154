// ── Listener interfaces ──
//
// Observers registered on the dispatcher. Callbacks run synchronously on
// the dispatching thread while the dispatcher's state lock is held: they
// must not call back into the dispatcher.

use serde::Serialize;
use strum::Display;

use crate::key::InstanceKey;
use crate::model::{DeviceConnectionState, ModelSelector, TelemetryEnvelope};

/// Per-kind telemetry observer. Every method defaults to a no-op so
/// implementors only override what they care about.
pub trait DataContextListener: Send + Sync {
    fn on_sensor_data(&self, _envelope: &TelemetryEnvelope) {}

    fn on_actuator_data(&self, _envelope: &TelemetryEnvelope) {}

    fn on_system_performance_data(&self, _envelope: &TelemetryEnvelope) {}

    fn on_connection_state_data(&self, _envelope: &TelemetryEnvelope) {}

    /// A locally initiated actuator command was accepted for `instance_key`.
    fn on_actuator_command(&self, _instance_key: &InstanceKey, _envelope: &TelemetryEnvelope) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
pub enum LogLevel {
    Debug,
    Warning,
    Error,
}

/// Observer for connection transitions, log lines and model changes.
pub trait SystemStatusListener: Send + Sync {
    fn on_connection_state(&self, _state: &DeviceConnectionState) {}

    fn on_log(&self, _level: LogLevel, _message: &str) {}

    fn on_model_update(&self, _instance_key: &InstanceKey, _selector: ModelSelector) {}
}
