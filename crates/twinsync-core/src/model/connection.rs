// ── Per-device connection records ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use super::envelope::{ConnectionPayload, TelemetryEnvelope, TelemetryPayload};

/// Where a device sits in its connection lifecycle.
///
/// `Unknown` is only ever the starting phase. The usual path is
/// `Unknown -> Connecting -> Connected <-> Disconnected`; any non-connection
/// telemetry jumps straight to `Connected`. Two more edges follow the
/// device's own report: `Unknown -> Disconnected` when the first thing
/// heard is a disconnect, and `Disconnected -> Connecting` when it starts
/// reconnecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize)]
pub enum ConnectionPhase {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

/// Derived connection record kept for every known device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceConnectionState {
    pub device_id: String,
    pub host_name: String,
    pub host_port: u16,
    pub phase: ConnectionPhase,
    /// Counters as last reported by the device. Never decrease.
    pub msg_in_count: u64,
    pub msg_out_count: u64,
    /// Envelopes observed from this device.
    pub messages_received: u64,
    /// Outgoing commands routed to this device.
    pub commands_sent: u64,
    pub last_message: String,
    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl DeviceConnectionState {
    pub fn new(device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            host_name: String::new(),
            host_port: 0,
            phase: ConnectionPhase::Unknown,
            msg_in_count: 0,
            msg_out_count: 0,
            messages_received: 0,
            commands_sent: 0,
            last_message: String::new(),
            first_seen: now,
            last_update: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    pub fn is_disconnected(&self) -> bool {
        self.phase == ConnectionPhase::Disconnected
    }

    /// Fold one incoming envelope into the record.
    ///
    /// Returns `Some((from, to))` when the phase changed.
    pub fn merge_incoming(
        &mut self,
        envelope: &TelemetryEnvelope,
    ) -> Option<(ConnectionPhase, ConnectionPhase)> {
        let previous = self.phase;
        self.messages_received += 1;
        self.last_update = envelope.timestamp;

        match &envelope.payload {
            TelemetryPayload::ConnectionState(payload) => self.merge_connection(payload),
            // Anything else means the device is talking to us.
            _ => self.phase = ConnectionPhase::Connected,
        }

        (previous != self.phase).then_some((previous, self.phase))
    }

    /// Record an outgoing command addressed to this device.
    pub fn record_outgoing(&mut self, at: DateTime<Utc>) {
        self.commands_sent += 1;
        self.last_update = at;
    }

    fn merge_connection(&mut self, payload: &ConnectionPayload) {
        if !payload.host_name.is_empty() {
            self.host_name.clone_from(&payload.host_name);
        }
        if payload.host_port != 0 {
            self.host_port = payload.host_port;
        }
        self.msg_in_count = self.msg_in_count.max(payload.msg_in_count);
        self.msg_out_count = self.msg_out_count.max(payload.msg_out_count);
        if !payload.message.is_empty() {
            self.last_message.clone_from(&payload.message);
        }

        // Connected wins over connecting; disconnected wins over both
        // only when the device says it is no longer connected.
        if payload.is_connected {
            self.phase = ConnectionPhase::Connected;
        } else if payload.is_disconnected {
            self.phase = ConnectionPhase::Disconnected;
        } else if payload.is_connecting {
            self.phase = ConnectionPhase::Connecting;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::type_ids;

    fn connection(flags: (bool, bool, bool), msg_in: u64) -> TelemetryEnvelope {
        let (is_connecting, is_connected, is_disconnected) = flags;
        TelemetryEnvelope::new(
            "edgedevice001",
            "LocationA",
            type_ids::CONNECTION_STATE_TYPE,
            TelemetryPayload::ConnectionState(ConnectionPayload {
                host_name: "broker.local".into(),
                host_port: 1883,
                is_connecting,
                is_connected,
                is_disconnected,
                msg_in_count: msg_in,
                msg_out_count: 0,
                message: "ok".into(),
            }),
        )
    }

    #[test]
    fn sensor_data_implies_connected() {
        let mut record = DeviceConnectionState::new("edgedevice001");
        let env = TelemetryEnvelope::sensor("edgedevice001", "LocationA", type_ids::TEMP_SENSOR_TYPE, 1.0);
        let change = record.merge_incoming(&env);
        assert_eq!(change, Some((ConnectionPhase::Unknown, ConnectionPhase::Connected)));
        assert!(record.is_connected());
        assert_eq!(record.messages_received, 1);

        assert_eq!(record.merge_incoming(&env), None);
    }

    #[test]
    fn connection_flags_drive_phase() {
        let mut record = DeviceConnectionState::new("edgedevice001");
        record.merge_incoming(&connection((true, false, false), 0));
        assert!(record.is_connecting());

        record.merge_incoming(&connection((false, true, false), 3));
        assert!(record.is_connected());
        assert_eq!(record.host_name, "broker.local");
        assert_eq!(record.host_port, 1883);

        let change = record.merge_incoming(&connection((false, false, true), 5));
        assert_eq!(change, Some((ConnectionPhase::Connected, ConnectionPhase::Disconnected)));
        assert_eq!(record.msg_in_count, 5);
    }

    #[test]
    fn reported_phase_is_taken_from_any_phase() {
        let mut record = DeviceConnectionState::new("edgedevice001");
        let change = record.merge_incoming(&connection((false, false, true), 0));
        assert_eq!(change, Some((ConnectionPhase::Unknown, ConnectionPhase::Disconnected)));

        let change = record.merge_incoming(&connection((true, false, false), 0));
        assert_eq!(change, Some((ConnectionPhase::Disconnected, ConnectionPhase::Connecting)));

        let change = record.merge_incoming(&connection((true, true, false), 0));
        assert_eq!(change, Some((ConnectionPhase::Connecting, ConnectionPhase::Connected)));
        assert_eq!(record.merge_incoming(&connection((false, false, false), 0)), None);
    }

    #[test]
    fn counters_never_decrease() {
        let mut record = DeviceConnectionState::new("dev");
        record.merge_incoming(&connection((false, true, false), 10));
        record.merge_incoming(&connection((false, true, false), 4));
        assert_eq!(record.msg_in_count, 10);
    }

    #[test]
    fn no_flags_keeps_phase() {
        let mut record = DeviceConnectionState::new("dev");
        record.merge_incoming(&connection((false, true, false), 0));
        assert_eq!(record.merge_incoming(&connection((false, false, false), 0)), None);
        assert!(record.is_connected());
    }
}
