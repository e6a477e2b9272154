// ── Envelope codec ──
//
// Devices written in a variety of languages publish "JSON" that is not
// always JSON: single-quoted strings and capitalized booleans show up in
// the wild. Payloads are normalized before decoding so those variants
// land on the same records.

use bytes::Bytes;
use tracing::trace;

use crate::error::Error;
use crate::topic::MessageKind;
use crate::wire::{
    ActuatorDataWire, ConnectionStateDataWire, SensorDataWire, SystemPerformanceDataWire,
    WireRecord,
};

/// Rewrite a loosely-quoted payload into strict JSON.
///
/// Outside string literals, `True`/`False`/`None` become `true`/`false`/`null`.
/// Single-quoted strings become double-quoted, with embedded double quotes
/// escaped. Already-valid JSON passes through unchanged.
pub fn normalize_payload(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut open_quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = open_quote {
            match c {
                '\\' => match chars.next() {
                    // `\'` is not a JSON escape; a bare quote is fine inside "...".
                    Some('\'') if quote == '\'' => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                c if c == quote => {
                    out.push('"');
                    open_quote = None;
                }
                '"' => out.push_str("\\\""),
                c => out.push(c),
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                open_quote = Some(c);
                out.push('"');
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            c => out.push(c),
        }
    }

    out
}

/// Decode a raw payload received under `kind`.
pub fn decode(kind: MessageKind, raw: &[u8]) -> Result<WireRecord, Error> {
    let text = std::str::from_utf8(raw)?;
    let normalized = normalize_payload(text.trim());
    trace!(%kind, bytes = raw.len(), "decoding payload");

    let parsed = match kind {
        MessageKind::SensorMsg => {
            serde_json::from_str::<SensorDataWire>(&normalized).map(WireRecord::Sensor)
        }
        MessageKind::ActuatorCmd | MessageKind::ActuatorResponse => {
            serde_json::from_str::<ActuatorDataWire>(&normalized).map(|mut r| {
                if kind == MessageKind::ActuatorResponse {
                    r.is_response = true;
                }
                WireRecord::Actuator(r)
            })
        }
        MessageKind::SystemPerfMsg => serde_json::from_str::<SystemPerformanceDataWire>(&normalized)
            .map(WireRecord::SystemPerformance),
        MessageKind::ConnectionStateMsg => {
            serde_json::from_str::<ConnectionStateDataWire>(&normalized)
                .map(WireRecord::ConnectionState)
        }
    };

    parsed.map_err(|e| Error::Decode {
        kind,
        message: e.to_string(),
        body: normalized,
    })
}

/// Encode a record as compact JSON.
pub fn encode(record: &WireRecord) -> Result<Bytes, Error> {
    let bytes = match record {
        WireRecord::Sensor(r) => serde_json::to_vec(r)?,
        WireRecord::Actuator(r) => serde_json::to_vec(r)?,
        WireRecord::SystemPerformance(r) => serde_json::to_vec(r)?,
        WireRecord::ConnectionState(r) => serde_json::to_vec(r)?,
    };
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_leaves_valid_json_alone() {
        let raw = r#"{"name": "TempSensor", "hasError": false, "value": 25.08}"#;
        assert_eq!(normalize_payload(raw), raw);
    }

    #[test]
    fn normalize_single_quotes_and_capitalized_booleans() {
        let raw = "{'name': 'TempSensor', 'hasError': False, 'isResponse': True, 'x': None}";
        assert_eq!(
            normalize_payload(raw),
            r#"{"name": "TempSensor", "hasError": false, "isResponse": true, "x": null}"#
        );
    }

    #[test]
    fn normalize_keeps_capitalized_words_inside_strings() {
        let raw = "{'stateData': 'True story', 'name': \"He said 'hi'\"}";
        assert_eq!(
            normalize_payload(raw),
            r#"{"stateData": "True story", "name": "He said 'hi'"}"#
        );
    }

    #[test]
    fn normalize_escapes_double_quotes_in_single_quoted_strings() {
        assert_eq!(normalize_payload(r#"{'a': 'say "x"'}"#), r#"{"a": "say \"x\""}"#);
    }

    #[test]
    fn decode_sensor_payload() {
        let raw = br#"{"name":"TempSensor","deviceID":"edgedevice001","locationID":"LocationA",
            "typeID":1013,"typeCategoryID":1000,"statusCode":0,"hasError":false,"value":25.08}"#;
        let WireRecord::Sensor(sensor) = decode(MessageKind::SensorMsg, raw).unwrap() else {
            panic!("expected sensor record");
        };
        assert_eq!(sensor.header.device_id, "edgedevice001");
        assert_eq!(sensor.header.type_id, 1013);
        assert!((sensor.value - 25.08).abs() < f64::EPSILON);
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let record = decode(MessageKind::SystemPerfMsg, b"{'cpuUtil': 12.5}").unwrap();
        let WireRecord::SystemPerformance(perf) = record else {
            panic!("expected system performance record");
        };
        assert_eq!(perf.header.device_id, "");
        assert!((perf.cpu_util - 12.5).abs() < f64::EPSILON);
        assert!(perf.header.latitude.is_none());
    }

    #[test]
    fn decode_marks_actuator_responses() {
        let record = decode(MessageKind::ActuatorResponse, b"{'command': 1, 'value': 22.0}").unwrap();
        assert_eq!(record.kind(), MessageKind::ActuatorResponse);
    }

    #[test]
    fn decode_error_carries_normalized_body() {
        let err = decode(MessageKind::SensorMsg, b"{'value': 'not a number'}").unwrap_err();
        match err {
            Error::Decode { kind, body, .. } => {
                assert_eq!(kind, MessageKind::SensorMsg);
                assert_eq!(body, r#"{"value": "not a number"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert!(matches!(
            decode(MessageKind::SensorMsg, &[0xff, 0xfe]),
            Err(Error::InvalidUtf8(_))
        ));
    }

    #[test]
    fn encode_uses_wire_field_names() {
        let mut sensor = SensorDataWire::default();
        sensor.header.device_id = "edgedevice001".into();
        sensor.header.type_id = 1013;
        sensor.value = 1.5;

        let bytes = encode(&WireRecord::Sensor(sensor.clone())).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["deviceID"], "edgedevice001");
        assert_eq!(json["typeID"], 1013);
        assert!(json.get("latitude").is_none());

        let back = decode(MessageKind::SensorMsg, &bytes).unwrap();
        assert_eq!(back, WireRecord::Sensor(sensor));
    }
}
