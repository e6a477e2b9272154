// ── Wire-to-domain conversions ──
//
// Bridges `twinsync_api` wire records into `TelemetryEnvelope` and back.
// Timestamps are parsed leniently: anything that is not RFC 3339 is
// replaced by the time of conversion.

use chrono::{DateTime, SecondsFormat, Utc};

use twinsync_api::wire::{
    ActuatorDataWire, ConnectionStateDataWire, SensorDataWire, SystemPerformanceDataWire,
    WireHeader, WireRecord,
};

use crate::model::{ActuatorPayload, ConnectionPayload, TelemetryEnvelope, TelemetryPayload};

// ── Helpers ────────────────────────────────────────────────────────

fn parse_timestamp(raw: Option<&String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

fn envelope_from_header(header: WireHeader, payload: TelemetryPayload) -> TelemetryEnvelope {
    TelemetryEnvelope {
        timestamp: parse_timestamp(header.time_stamp.as_ref()),
        name: header.name,
        device_id: header.device_id,
        location_id: header.location_id,
        type_id: header.type_id,
        type_category_id: header.type_category_id,
        status_code: header.status_code,
        has_error: header.has_error,
        latitude: header.latitude,
        longitude: header.longitude,
        elevation: header.elevation,
        heading: header.heading,
        payload,
    }
}

fn header_from_envelope(envelope: &TelemetryEnvelope) -> WireHeader {
    WireHeader {
        name: envelope.name.clone(),
        device_id: envelope.device_id.clone(),
        location_id: envelope.location_id.clone(),
        type_id: envelope.type_id,
        type_category_id: envelope.type_category_id,
        status_code: envelope.status_code,
        time_stamp: Some(envelope.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        has_error: envelope.has_error,
        latitude: envelope.latitude,
        longitude: envelope.longitude,
        elevation: envelope.elevation,
        heading: envelope.heading,
    }
}

// ── WireRecord → TelemetryEnvelope ─────────────────────────────────

impl From<WireRecord> for TelemetryEnvelope {
    fn from(record: WireRecord) -> Self {
        match record {
            WireRecord::Sensor(r) => {
                envelope_from_header(r.header, TelemetryPayload::Sensor { value: r.value })
            }
            WireRecord::Actuator(r) => envelope_from_header(
                r.header,
                TelemetryPayload::Actuator(ActuatorPayload {
                    command: r.command,
                    value: r.value,
                    state_data: r.state_data,
                    is_response: r.is_response,
                }),
            ),
            WireRecord::SystemPerformance(r) => envelope_from_header(
                r.header,
                TelemetryPayload::SystemPerformance {
                    cpu_util: r.cpu_util,
                    mem_util: r.mem_util,
                    disk_util: r.disk_util,
                },
            ),
            WireRecord::ConnectionState(r) => envelope_from_header(
                r.header,
                TelemetryPayload::ConnectionState(ConnectionPayload {
                    host_name: r.host_name,
                    host_port: r.host_port,
                    is_connecting: r.is_connecting,
                    is_connected: r.is_connected,
                    is_disconnected: r.is_disconnected,
                    msg_in_count: r.msg_in_count,
                    msg_out_count: r.msg_out_count,
                    message: r.message,
                }),
            ),
        }
    }
}

// ── TelemetryEnvelope → WireRecord ─────────────────────────────────

impl From<&TelemetryEnvelope> for WireRecord {
    fn from(envelope: &TelemetryEnvelope) -> Self {
        let header = header_from_envelope(envelope);
        match &envelope.payload {
            TelemetryPayload::Sensor { value } => WireRecord::Sensor(SensorDataWire {
                header,
                value: *value,
            }),
            TelemetryPayload::Actuator(a) => WireRecord::Actuator(ActuatorDataWire {
                header,
                command: a.command,
                value: a.value,
                state_data: a.state_data.clone(),
                is_response: a.is_response,
            }),
            TelemetryPayload::SystemPerformance {
                cpu_util,
                mem_util,
                disk_util,
            } => WireRecord::SystemPerformance(SystemPerformanceDataWire {
                header,
                cpu_util: *cpu_util,
                mem_util: *mem_util,
                disk_util: *disk_util,
            }),
            TelemetryPayload::ConnectionState(c) => {
                WireRecord::ConnectionState(ConnectionStateDataWire {
                    header,
                    host_name: c.host_name.clone(),
                    host_port: c.host_port,
                    is_connecting: c.is_connecting,
                    is_connected: c.is_connected,
                    is_disconnected: c.is_disconnected,
                    msg_in_count: c.msg_in_count,
                    msg_out_count: c.msg_out_count,
                    message: c.message.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use twinsync_api::MessageKind;
    use twinsync_api::codec;

    #[test]
    fn decoded_sensor_becomes_envelope() {
        let raw = br#"{'name': 'TempSensor', 'deviceID': 'edgedevice001', 'locationID': 'LocationA',
            'typeID': 1013, 'typeCategoryID': 1000, 'timeStamp': '2024-05-01T12:00:00Z',
            'hasError': False, 'value': 25.08}"#;
        let record = codec::decode(MessageKind::SensorMsg, raw).unwrap();
        let env = TelemetryEnvelope::from(record);

        assert_eq!(env.device_id, "edgedevice001");
        assert_eq!(env.type_category_id, 1000);
        assert_eq!(env.payload, TelemetryPayload::Sensor { value: 25.08 });
        assert_eq!(env.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let record = WireRecord::Sensor(SensorDataWire {
            header: WireHeader {
                time_stamp: Some("yesterday".into()),
                ..WireHeader::default()
            },
            value: 1.0,
        });
        assert!(TelemetryEnvelope::from(record).timestamp >= before);
    }

    #[test]
    fn actuator_response_survives_the_boundary() {
        let mut env = TelemetryEnvelope::new(
            "dev",
            "loc",
            1001,
            TelemetryPayload::Actuator(ActuatorPayload {
                command: 1,
                value: 22.0,
                state_data: "on".into(),
                is_response: true,
            }),
        );
        env.latitude = Some(45.0);

        let record = WireRecord::from(&env);
        assert_eq!(record.kind(), MessageKind::ActuatorResponse);
        assert_eq!(record.header().latitude, Some(45.0));

        let back = TelemetryEnvelope::from(record);
        assert_eq!(back.payload, env.payload);
        assert_eq!(back.latitude, Some(45.0));
    }
}
