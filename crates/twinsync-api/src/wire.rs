// ── Wire records ──
//
// Exact JSON shapes devices publish. Field names are camelCase with the
// legacy `ID` suffix spelling; every field is optional on the wire and
// defaults when absent so that partially-populated payloads still decode.

use serde::{Deserialize, Serialize};

use crate::topic::MessageKind;

/// Fields shared by every telemetry record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireHeader {
    pub name: String,
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "typeID")]
    pub type_id: i32,
    #[serde(rename = "typeCategoryID")]
    pub type_category_id: i32,
    pub status_code: i32,
    /// ISO-8601 timestamp as sent by the device.
    pub time_stamp: Option<String>,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorDataWire {
    #[serde(flatten)]
    pub header: WireHeader,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActuatorDataWire {
    #[serde(flatten)]
    pub header: WireHeader,
    pub command: i32,
    pub value: f64,
    pub state_data: String,
    pub is_response: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemPerformanceDataWire {
    #[serde(flatten)]
    pub header: WireHeader,
    pub cpu_util: f64,
    pub mem_util: f64,
    pub disk_util: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionStateDataWire {
    #[serde(flatten)]
    pub header: WireHeader,
    pub host_name: String,
    pub host_port: u16,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub is_disconnected: bool,
    pub msg_in_count: u64,
    pub msg_out_count: u64,
    pub message: String,
}

/// One decoded record, tagged by the kind it was decoded as.
#[derive(Debug, Clone, PartialEq)]
pub enum WireRecord {
    Sensor(SensorDataWire),
    Actuator(ActuatorDataWire),
    SystemPerformance(SystemPerformanceDataWire),
    ConnectionState(ConnectionStateDataWire),
}

impl WireRecord {
    pub fn header(&self) -> &WireHeader {
        match self {
            Self::Sensor(r) => &r.header,
            Self::Actuator(r) => &r.header,
            Self::SystemPerformance(r) => &r.header,
            Self::ConnectionState(r) => &r.header,
        }
    }

    /// The message kind this record is published under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Sensor(_) => MessageKind::SensorMsg,
            Self::Actuator(r) if r.is_response => MessageKind::ActuatorResponse,
            Self::Actuator(_) => MessageKind::ActuatorCmd,
            Self::SystemPerformance(_) => MessageKind::SystemPerfMsg,
            Self::ConnectionState(_) => MessageKind::ConnectionStateMsg,
        }
    }
}
