// ── Telemetry envelope domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::key::{DataSyncKey, compute_data_sync_key, type_ids};

/// Which family of telemetry an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum TelemetryKind {
    Sensor,
    Actuator,
    SystemPerformance,
    ConnectionState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorPayload {
    pub command: i32,
    pub value: f64,
    pub state_data: String,
    /// `true` when the device is acknowledging a command rather than
    /// being asked to execute one.
    pub is_response: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ConnectionPayload {
    pub host_name: String,
    pub host_port: u16,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub is_disconnected: bool,
    pub msg_in_count: u64,
    pub msg_out_count: u64,
    pub message: String,
}

/// Kind-specific body of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryPayload {
    Sensor {
        value: f64,
    },
    Actuator(ActuatorPayload),
    SystemPerformance {
        cpu_util: f64,
        mem_util: f64,
        disk_util: f64,
    },
    ConnectionState(ConnectionPayload),
}

/// One unit of telemetry as received from (or sent to) a device.
///
/// Treated as immutable once received: the dispatcher and twins each keep
/// their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub name: String,
    pub device_id: String,
    pub location_id: String,
    pub type_id: i32,
    pub type_category_id: i32,
    pub status_code: i32,
    pub timestamp: DateTime<Utc>,
    pub has_error: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub heading: Option<f64>,
    pub payload: TelemetryPayload,
}

impl TelemetryEnvelope {
    /// Envelope with identity fields set and everything else defaulted.
    pub fn new(
        device_id: impl Into<String>,
        location_id: impl Into<String>,
        type_id: i32,
        payload: TelemetryPayload,
    ) -> Self {
        Self {
            name: String::new(),
            device_id: device_id.into(),
            location_id: location_id.into(),
            type_id,
            type_category_id: type_ids::DEFAULT_TYPE_ID,
            status_code: 0,
            timestamp: Utc::now(),
            has_error: false,
            latitude: None,
            longitude: None,
            elevation: None,
            heading: None,
            payload,
        }
    }

    pub fn sensor(device_id: &str, location_id: &str, type_id: i32, value: f64) -> Self {
        Self::new(device_id, location_id, type_id, TelemetryPayload::Sensor { value })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_category(mut self, type_category_id: i32) -> Self {
        self.type_category_id = type_category_id;
        self
    }

    pub fn kind(&self) -> TelemetryKind {
        match self.payload {
            TelemetryPayload::Sensor { .. } => TelemetryKind::Sensor,
            TelemetryPayload::Actuator(_) => TelemetryKind::Actuator,
            TelemetryPayload::SystemPerformance { .. } => TelemetryKind::SystemPerformance,
            TelemetryPayload::ConnectionState(_) => TelemetryKind::ConnectionState,
        }
    }

    /// No identity at all: nothing to route or apply.
    pub fn is_empty(&self) -> bool {
        self.device_id.trim().is_empty()
            && self.name.trim().is_empty()
            && self.type_id == type_ids::DEFAULT_TYPE_ID
    }

    pub fn is_actuator_response(&self) -> bool {
        matches!(&self.payload, TelemetryPayload::Actuator(a) if a.is_response)
    }

    /// Stable key used to match this envelope to subscribed twins.
    pub fn data_sync_key(&self) -> DataSyncKey {
        compute_data_sync_key(&self.device_id, &self.location_id, false)
    }

    /// Property name/value pairs this envelope carries, named the way
    /// schemas name them.
    pub fn property_values(&self) -> Vec<(&'static str, Value)> {
        let mut values = vec![
            ("statusCode", Value::from(self.status_code)),
            ("hasError", Value::from(self.has_error)),
        ];
        let position = [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("elevation", self.elevation),
            ("heading", self.heading),
        ];
        values.extend(
            position
                .into_iter()
                .filter_map(|(name, v)| v.map(|v| (name, Value::from(v)))),
        );

        match &self.payload {
            TelemetryPayload::Sensor { value } => {
                values.push(("value", Value::from(*value)));
            }
            TelemetryPayload::Actuator(a) => {
                values.push(("command", Value::from(a.command)));
                values.push(("value", Value::from(a.value)));
                values.push(("stateData", Value::from(a.state_data.as_str())));
            }
            TelemetryPayload::SystemPerformance {
                cpu_util,
                mem_util,
                disk_util,
            } => {
                values.push(("cpuUtil", Value::from(*cpu_util)));
                values.push(("memUtil", Value::from(*mem_util)));
                values.push(("diskUtil", Value::from(*disk_util)));
            }
            TelemetryPayload::ConnectionState(c) => {
                values.push(("isConnected", Value::from(c.is_connected)));
                values.push(("msgInCount", Value::from(c.msg_in_count)));
                values.push(("msgOutCount", Value::from(c.msg_out_count)));
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_envelope_detection() {
        let env = TelemetryEnvelope::sensor("", "", type_ids::DEFAULT_TYPE_ID, 0.0);
        assert!(env.is_empty());
        assert!(!env.clone().with_name("TempSensor").is_empty());
        assert!(!TelemetryEnvelope::sensor("dev", "", 0, 0.0).is_empty());
    }

    #[test]
    fn sensor_property_values() {
        let env = TelemetryEnvelope::sensor("dev", "loc", type_ids::TEMP_SENSOR_TYPE, 25.08);
        let values = env.property_values();
        assert!(values.contains(&("value", Value::from(25.08))));
        assert!(values.contains(&("hasError", Value::from(false))));
        assert!(!values.iter().any(|(name, _)| *name == "latitude"));
    }

    #[test]
    fn actuator_response_flag() {
        let mut env = TelemetryEnvelope::new(
            "dev",
            "loc",
            type_ids::HVAC_ACTUATOR_TYPE,
            TelemetryPayload::Actuator(ActuatorPayload::default()),
        );
        assert_eq!(env.kind(), TelemetryKind::Actuator);
        assert!(!env.is_actuator_response());
        if let TelemetryPayload::Actuator(a) = &mut env.payload {
            a.is_response = true;
        }
        assert!(env.is_actuator_response());
    }
}
