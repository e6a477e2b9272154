// ── Identity keys ──
//
// Every lookup in the registry goes through one of three identity strings:
//
// - `DataSyncKey`: `device:location:guid`, identifies a physical data source.
//   The stable form carries the placeholder in the guid slot and is what
//   incoming telemetry is matched on.
// - `InstanceKey`: same layout, always GUID-qualified, identifies one twin.
// - `ModelId`: schema reference, derived from a selector or type code.
//
// Keys are only ever produced by the functions in this module. Empty
// fields degrade to `PLACEHOLDER`; nothing here can fail.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ModelSelector;

/// Substituted for any empty identity field.
pub const PLACEHOLDER: &str = "Not Set";

/// Joins key segments. Order is always device, location, guid.
pub const KEY_SEPARATOR: char = ':';

// ── Type codes ──────────────────────────────────────────────────────

/// Telemetry type and category codes published by devices.
pub mod type_ids {
    pub const DEFAULT_TYPE_ID: i32 = 0;

    pub const ENV_DEVICE_TYPE: i32 = 1000;
    pub const HVAC_ACTUATOR_TYPE: i32 = 1001;
    pub const HUMIDIFIER_ACTUATOR_TYPE: i32 = 1002;
    pub const HUMIDITY_SENSOR_TYPE: i32 = 1010;
    pub const PRESSURE_SENSOR_TYPE: i32 = 1012;
    pub const TEMP_SENSOR_TYPE: i32 = 1013;
    pub const LED_DISPLAY_ACTUATOR_TYPE: i32 = 1100;

    pub const CONNECTION_STATE_TYPE: i32 = 8000;
    pub const EDGE_DEVICE_TYPE: i32 = 8001;
    pub const CONSTRAINED_DEVICE_TYPE: i32 = 8002;

    pub const SYSTEM_PERF_TYPE: i32 = 9000;
    pub const CPU_UTIL_TYPE: i32 = 9001;
    pub const DISK_UTIL_TYPE: i32 = 9002;
    pub const MEM_UTIL_TYPE: i32 = 9004;
}

/// Known type codes and the schema each one implies. Codes absent from
/// this table resolve to [`ModelSelector::Context`].
pub const TYPE_MODEL_TABLE: &[(i32, ModelSelector)] = &[
    (type_ids::ENV_DEVICE_TYPE, ModelSelector::EnvSensors),
    (type_ids::HUMIDITY_SENSOR_TYPE, ModelSelector::EnvSensors),
    (type_ids::PRESSURE_SENSOR_TYPE, ModelSelector::EnvSensors),
    (type_ids::TEMP_SENSOR_TYPE, ModelSelector::EnvSensors),
    (type_ids::HVAC_ACTUATOR_TYPE, ModelSelector::Thermostat),
    (type_ids::HUMIDIFIER_ACTUATOR_TYPE, ModelSelector::Humidifier),
    (type_ids::LED_DISPLAY_ACTUATOR_TYPE, ModelSelector::LedDisplay),
    (type_ids::EDGE_DEVICE_TYPE, ModelSelector::EdgeDevice),
    (type_ids::CONSTRAINED_DEVICE_TYPE, ModelSelector::ConstrainedDevice),
    (type_ids::SYSTEM_PERF_TYPE, ModelSelector::SystemPerformance),
    (type_ids::CPU_UTIL_TYPE, ModelSelector::SystemPerformance),
    (type_ids::DISK_UTIL_TYPE, ModelSelector::SystemPerformance),
    (type_ids::MEM_UTIL_TYPE, ModelSelector::SystemPerformance),
];

// ── Key types ───────────────────────────────────────────────────────

/// Identifies a physical data source. See the module docs for layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSyncKey(String);

impl DataSyncKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn device_id(&self) -> &str {
        segment(&self.0, 0)
    }

    pub fn location_id(&self) -> &str {
        segment(&self.0, 1)
    }

    /// `true` when the guid slot holds the placeholder.
    pub fn is_stable(&self) -> bool {
        segment(&self.0, 2) == PLACEHOLDER
    }

    /// The stable form of this key (identity if already stable).
    pub fn to_stable(&self) -> Self {
        compute_data_sync_key(self.device_id(), self.location_id(), false)
    }
}

impl fmt::Display for DataSyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies exactly one constructed twin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn device_id(&self) -> &str {
        segment(&self.0, 0)
    }

    pub fn location_id(&self) -> &str {
        segment(&self.0, 1)
    }

    /// The stable data-sync key this instance subscribes to.
    pub fn data_sync_key(&self) -> DataSyncKey {
        compute_data_sync_key(self.device_id(), self.location_id(), false)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schema reference string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    pub(crate) fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Key functions ───────────────────────────────────────────────────

/// Build a data-sync key.
///
/// `use_guid = false` yields the stable form, a pure function of
/// `(device_id, location_id)`. `use_guid = true` appends a freshly
/// generated GUID and is only meaningful for in-process disambiguation.
/// Names and groups never participate in the key.
pub fn compute_data_sync_key(device_id: &str, location_id: &str, use_guid: bool) -> DataSyncKey {
    let guid = if use_guid {
        Uuid::new_v4().to_string()
    } else {
        PLACEHOLDER.to_owned()
    };
    DataSyncKey(join(device_id, location_id, &guid))
}

/// Build the instance key for a twin with the given identity and GUID.
pub fn compute_instance_key(device_id: &str, location_id: &str, guid: &Uuid) -> InstanceKey {
    InstanceKey(join(device_id, location_id, &guid.to_string()))
}

/// Selector implied by a telemetry type code.
pub fn selector_for_type(type_id: i32) -> ModelSelector {
    TYPE_MODEL_TABLE
        .iter()
        .find(|(code, _)| *code == type_id)
        .map_or(ModelSelector::Context, |(_, selector)| *selector)
}

/// Schema reference implied by a telemetry type code.
pub fn compute_model_id(type_id: i32) -> ModelId {
    selector_for_type(type_id).model_id()
}

/// Identity field with empty or whitespace-only input replaced by the placeholder.
pub fn field_or_placeholder(field: &str) -> &str {
    let trimmed = field.trim();
    if trimmed.is_empty() { PLACEHOLDER } else { trimmed }
}

fn join(device_id: &str, location_id: &str, guid: &str) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
        field_or_placeholder(device_id),
        field_or_placeholder(location_id),
        field_or_placeholder(guid),
    )
}

/// Segments are split from the right: device ids may legitimately
/// contain the separator, the guid and location slots are read last-first.
fn segment(key: &str, index: usize) -> &str {
    let mut parts = key.rsplitn(3, KEY_SEPARATOR);
    let guid = parts.next().unwrap_or(PLACEHOLDER);
    let location = parts.next().unwrap_or(PLACEHOLDER);
    let device = parts.next().unwrap_or(PLACEHOLDER);
    match index {
        0 => device,
        1 => location,
        _ => guid,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn stable_key_layout() {
        let key = compute_data_sync_key("edgedevice001", "LocationA", false);
        assert_eq!(key.as_str(), "edgedevice001:LocationA:Not Set");
        assert!(key.is_stable());
        assert_eq!(key.device_id(), "edgedevice001");
        assert_eq!(key.location_id(), "LocationA");
    }

    #[test]
    fn stable_key_is_deterministic() {
        let pairs = [("a", "b"), ("dev", ""), ("", ""), ("x y", "z")];
        for (device, location) in pairs {
            assert_eq!(
                compute_data_sync_key(device, location, false),
                compute_data_sync_key(device, location, false)
            );
        }
    }

    #[test]
    fn stable_key_is_order_sensitive() {
        let pairs = [("a", "b"), ("edgedevice001", "LocationA"), ("dev", "")];
        for (device, location) in pairs {
            assert_ne!(
                compute_data_sync_key(device, location, false),
                compute_data_sync_key(location, device, false)
            );
        }
        assert_eq!(
            compute_data_sync_key("same", "same", false),
            compute_data_sync_key("same", "same", false)
        );
    }

    #[test]
    fn empty_fields_become_placeholders() {
        let key = compute_data_sync_key("", "   ", false);
        assert_eq!(key.as_str(), "Not Set:Not Set:Not Set");
    }

    #[test]
    fn guid_form_is_unique_but_shares_stable_form() {
        let a = compute_data_sync_key("dev", "loc", true);
        let b = compute_data_sync_key("dev", "loc", true);
        assert_ne!(a, b);
        assert!(!a.is_stable());
        assert_eq!(a.to_stable(), b.to_stable());
        assert_eq!(a.to_stable(), compute_data_sync_key("dev", "loc", false));
    }

    #[test]
    fn instance_key_carries_guid() {
        let guid = Uuid::new_v4();
        let key = compute_instance_key("dev", "loc", &guid);
        assert_eq!(key.as_str(), format!("dev:loc:{guid}"));
        assert_eq!(key.data_sync_key(), compute_data_sync_key("dev", "loc", false));
    }

    #[test]
    fn device_ids_may_contain_separator() {
        let key = compute_data_sync_key("urn:dev:1", "loc", false);
        assert_eq!(key.device_id(), "urn:dev:1");
        assert_eq!(key.location_id(), "loc");
    }

    #[test]
    fn type_table_resolves_every_entry() {
        for (code, selector) in TYPE_MODEL_TABLE {
            assert_eq!(selector_for_type(*code), *selector);
            assert_eq!(compute_model_id(*code), selector.model_id());
        }
    }

    #[test]
    fn type_table_has_no_duplicate_codes() {
        let mut codes: Vec<i32> = TYPE_MODEL_TABLE.iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), TYPE_MODEL_TABLE.len());
    }

    #[test]
    fn unknown_type_falls_back_to_context() {
        assert_eq!(compute_model_id(-1), ModelSelector::Context.model_id());
        assert_eq!(compute_model_id(type_ids::DEFAULT_TYPE_ID), ModelSelector::Context.model_id());
        assert_eq!(compute_model_id(type_ids::CONNECTION_STATE_TYPE), ModelSelector::Context.model_id());
    }

    #[test]
    fn every_non_context_selector_is_reachable_from_a_type_code() {
        for selector in ModelSelector::iter().filter(|s| *s != ModelSelector::Context) {
            assert!(
                TYPE_MODEL_TABLE.iter().any(|(_, s)| *s == selector),
                "{selector} has no type code"
            );
        }
    }
}
