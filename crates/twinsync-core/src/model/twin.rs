// ── Twin state ──
//
// One addressable digital-twin instance. A twin owns its property table
// and its identity; the registry owns the twin and keeps the indices
// pointing at it in sync with that identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{TelemetryEnvelope, TelemetryPayload};
use super::property::TwinProperty;
use super::selector::ModelSelector;
use crate::key::{DataSyncKey, InstanceKey, ModelId, compute_data_sync_key, compute_instance_key};

/// Callbacks a twin makes to whoever owns it.
pub trait TwinListener: Send + Sync {
    /// The device acknowledged a command.
    fn on_actuator_response(&self, instance_key: &InstanceKey, envelope: &TelemetryEnvelope);

    /// A locally initiated state change was accepted by the twin.
    fn on_outgoing_state_update(&self, _instance_key: &InstanceKey, _envelope: &TelemetryEnvelope) {}
}

/// Result of checking whether one twin may adopt another as a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Adoption {
    Link,
    AlreadyLinked,
    Rejected(&'static str),
}

#[derive(Clone, Serialize)]
pub struct TwinState {
    model_id: ModelId,
    selector: ModelSelector,
    guid: Uuid,
    device_id: String,
    location_id: String,
    instance_key: InstanceKey,
    data_sync_key: DataSyncKey,
    #[serde(skip)]
    schema_text: Option<Arc<str>>,
    properties: BTreeMap<String, TwinProperty>,
    children: IndexSet<InstanceKey>,
    parent: Option<InstanceKey>,
    enabled: bool,
    #[serde(skip)]
    listener: Option<Arc<dyn TwinListener>>,
    last_received: Option<TelemetryEnvelope>,
    last_sent: Option<TelemetryEnvelope>,
    /// Instance key this state is currently indexed under, if any.
    #[serde(skip)]
    pub(crate) bound_key: Option<InstanceKey>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TwinState {
    /// New unbound twin with a fresh GUID and an empty property table.
    pub fn new(selector: ModelSelector, device_id: &str, location_id: &str) -> Self {
        let guid = Uuid::new_v4();
        let now = Utc::now();
        Self {
            model_id: selector.model_id(),
            selector,
            guid,
            device_id: device_id.trim().to_owned(),
            location_id: location_id.trim().to_owned(),
            instance_key: compute_instance_key(device_id, location_id, &guid),
            data_sync_key: compute_data_sync_key(device_id, location_id, false),
            schema_text: None,
            properties: BTreeMap::new(),
            children: IndexSet::new(),
            parent: None,
            enabled: true,
            listener: None,
            last_received: None,
            last_sent: None,
            bound_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TwinListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn selector(&self) -> ModelSelector {
        self.selector
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    pub fn data_sync_key(&self) -> &DataSyncKey {
        &self.data_sync_key
    }

    /// Change the device id. Only the embedded identity moves; callers
    /// outside the crate go through the registry's rebinding instead.
    pub(crate) fn set_device_id(&mut self, device_id: &str) {
        self.device_id = device_id.trim().to_owned();
        self.refresh_keys();
    }

    /// Location counterpart of [`set_device_id`](Self::set_device_id).
    pub(crate) fn set_location_id(&mut self, location_id: &str) {
        self.location_id = location_id.trim().to_owned();
        self.refresh_keys();
    }

    fn refresh_keys(&mut self) {
        self.instance_key = compute_instance_key(&self.device_id, &self.location_id, &self.guid);
        self.data_sync_key = compute_data_sync_key(&self.device_id, &self.location_id, false);
        self.updated_at = Utc::now();
    }

    // ── Schema and properties ────────────────────────────────────────

    pub fn schema_text(&self) -> Option<&str> {
        self.schema_text.as_deref()
    }

    pub(crate) fn set_schema_text(&mut self, text: Option<Arc<str>>) {
        self.schema_text = text;
    }

    pub fn properties(&self) -> &BTreeMap<String, TwinProperty> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&TwinProperty> {
        self.properties.get(name)
    }

    /// Add properties that are not already present. Existing entries and
    /// their values are left alone. Returns how many were added.
    pub(crate) fn merge_properties(&mut self, properties: impl IntoIterator<Item = TwinProperty>) -> usize {
        let mut added = 0;
        for property in properties {
            if !self.properties.contains_key(&property.name) {
                self.properties.insert(property.name.clone(), property);
                added += 1;
            }
        }
        added
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn last_received(&self) -> Option<&TelemetryEnvelope> {
        self.last_received.as_ref()
    }

    pub fn last_sent(&self) -> Option<&TelemetryEnvelope> {
        self.last_sent.as_ref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ── Telemetry paths ──────────────────────────────────────────────

    /// Apply telemetry received from the device.
    ///
    /// Keeps a copy of the envelope and updates every property the
    /// envelope carries a value for. Properties the schema does not
    /// declare are ignored.
    pub fn handle_incoming_telemetry(&mut self, envelope: &TelemetryEnvelope) -> bool {
        if envelope.is_empty() {
            warn!(instance_key = %self.instance_key, "ignoring empty telemetry envelope");
            return false;
        }
        if !self.enabled {
            debug!(instance_key = %self.instance_key, "twin disabled, ignoring telemetry");
            return false;
        }

        let received = envelope.clone();
        let at = received.timestamp;
        for (name, value) in received.property_values() {
            if let Some(property) = self.properties.get_mut(name) {
                property.update_value(value, at);
            }
        }
        self.last_received = Some(received);
        self.updated_at = Utc::now();

        if envelope.is_actuator_response() {
            if let Some(listener) = &self.listener {
                listener.on_actuator_response(&self.instance_key, envelope);
            }
        }
        true
    }

    /// Apply a locally initiated state change as property targets.
    ///
    /// Actuator commands are checked against the `command` property's
    /// valid codes before anything is touched.
    pub fn handle_outgoing_state_update(&mut self, envelope: &TelemetryEnvelope) -> bool {
        if envelope.is_empty() {
            warn!(instance_key = %self.instance_key, "ignoring empty outgoing update");
            return false;
        }
        if !self.enabled {
            return false;
        }

        if let TelemetryPayload::Actuator(actuator) = &envelope.payload {
            let rejected = self
                .properties
                .get("command")
                .is_some_and(|p| !p.accepts_command(actuator.command));
            if rejected {
                warn!(
                    instance_key = %self.instance_key,
                    command = actuator.command,
                    "command code not accepted by twin"
                );
                return false;
            }
        }

        let at = Utc::now();
        let targets: Vec<(&'static str, Value)> = match &envelope.payload {
            TelemetryPayload::Actuator(actuator) => vec![
                ("command", Value::from(actuator.command)),
                ("value", Value::from(actuator.value)),
                ("stateData", Value::from(actuator.state_data.as_str())),
            ],
            _ => envelope.property_values(),
        };
        for (name, target) in targets {
            if let Some(property) = self.properties.get_mut(name) {
                if property.writable {
                    property.set_target(target, at);
                }
            }
        }

        self.last_sent = Some(envelope.clone());
        self.updated_at = at;
        if let Some(listener) = &self.listener {
            listener.on_outgoing_state_update(&self.instance_key, envelope);
        }
        true
    }

    // ── Parent/child edges ───────────────────────────────────────────

    pub fn children(&self) -> impl Iterator<Item = &InstanceKey> {
        self.children.iter()
    }

    pub fn has_child(&self, key: &InstanceKey) -> bool {
        self.children.contains(key)
    }

    pub fn parent(&self) -> Option<&InstanceKey> {
        self.parent.as_ref()
    }

    /// Attach `child` under this twin.
    ///
    /// Leaf-only: a child that has children of its own is rejected, as is
    /// a self edge. A child that already has a different parent keeps it.
    /// Returns `true` when the edge exists afterwards.
    pub fn add_connected_model_state(&mut self, child: &mut TwinState) -> bool {
        match self.adoption(child) {
            Adoption::Link => {
                self.link_child(child.instance_key.clone());
                child.parent = Some(self.instance_key.clone());
                true
            }
            Adoption::AlreadyLinked => true,
            Adoption::Rejected(reason) => {
                debug!(
                    parent = %self.instance_key,
                    child = %child.instance_key,
                    reason,
                    "child twin rejected"
                );
                false
            }
        }
    }

    pub(crate) fn adoption(&self, child: &TwinState) -> Adoption {
        if child.instance_key == self.instance_key {
            return Adoption::Rejected("self edge");
        }
        match &child.parent {
            Some(parent) if *parent == self.instance_key => return Adoption::AlreadyLinked,
            Some(_) => return Adoption::Rejected("child already has a parent"),
            None => {}
        }
        if !child.children.is_empty() {
            return Adoption::Rejected("child is not a leaf");
        }
        Adoption::Link
    }

    pub(crate) fn link_child(&mut self, key: InstanceKey) {
        self.children.insert(key);
    }

    pub(crate) fn unlink_child(&mut self, key: &InstanceKey) -> bool {
        self.children.shift_remove(key)
    }

    /// Swap `old` for `new` in the child set, keeping its position.
    pub(crate) fn relink_child(&mut self, old: &InstanceKey, new: InstanceKey) {
        if let Some(index) = self.children.get_index_of(old) {
            self.children.shift_remove_index(index);
            let (inserted_at, _) = self.children.insert_full(new);
            self.children.move_index(inserted_at, index);
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<InstanceKey>) {
        self.parent = parent;
    }
}

impl fmt::Debug for TwinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwinState")
            .field("model_id", &self.model_id)
            .field("instance_key", &self.instance_key)
            .field("data_sync_key", &self.data_sync_key)
            .field("properties", &self.properties.len())
            .field("children", &self.children)
            .field("parent", &self.parent)
            .field("enabled", &self.enabled)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::key::type_ids;
    use crate::model::envelope::ActuatorPayload;

    #[derive(Default)]
    struct Recorder {
        responses: Mutex<Vec<String>>,
        outgoing: Mutex<Vec<String>>,
    }

    impl TwinListener for Recorder {
        fn on_actuator_response(&self, key: &InstanceKey, _: &TelemetryEnvelope) {
            self.responses.lock().unwrap().push(key.to_string());
        }

        fn on_outgoing_state_update(&self, key: &InstanceKey, _: &TelemetryEnvelope) {
            self.outgoing.lock().unwrap().push(key.to_string());
        }
    }

    fn env_twin() -> TwinState {
        let mut twin = TwinState::new(ModelSelector::EnvSensors, "edgedevice001", "LocationA");
        let mut value = TwinProperty::new("value");
        value.telemetry = true;
        twin.merge_properties([value]);
        twin
    }

    fn actuator(command: i32, is_response: bool) -> TelemetryEnvelope {
        TelemetryEnvelope::new(
            "edgedevice001",
            "LocationA",
            type_ids::HVAC_ACTUATOR_TYPE,
            TelemetryPayload::Actuator(ActuatorPayload {
                command,
                value: 21.5,
                state_data: String::new(),
                is_response,
            }),
        )
    }

    #[test]
    fn incoming_updates_declared_properties() {
        let mut twin = env_twin();
        let env = TelemetryEnvelope::sensor("edgedevice001", "LocationA", type_ids::TEMP_SENSOR_TYPE, 25.08);
        assert!(twin.handle_incoming_telemetry(&env));
        assert_eq!(twin.property("value").unwrap().value.as_f64(), Some(25.08));
        assert!(twin.property("hasError").is_none());
        assert_eq!(twin.last_received(), Some(&env));
    }

    #[test]
    fn empty_envelope_is_rejected() {
        let mut twin = env_twin();
        let env = TelemetryEnvelope::sensor("", "", type_ids::DEFAULT_TYPE_ID, 1.0);
        assert!(!twin.handle_incoming_telemetry(&env));
        assert!(twin.last_received().is_none());
    }

    #[test]
    fn actuator_response_notifies_listener() {
        let recorder = Arc::new(Recorder::default());
        let mut twin = TwinState::new(ModelSelector::Thermostat, "edgedevice001", "LocationA")
            .with_listener(recorder.clone());

        twin.handle_incoming_telemetry(&actuator(1, false));
        assert!(recorder.responses.lock().unwrap().is_empty());

        twin.handle_incoming_telemetry(&actuator(1, true));
        assert_eq!(recorder.responses.lock().unwrap().len(), 1);
    }

    #[test]
    fn outgoing_checks_command_codes() {
        let recorder = Arc::new(Recorder::default());
        let mut twin = TwinState::new(ModelSelector::Thermostat, "edgedevice001", "LocationA")
            .with_listener(recorder.clone());
        let mut command = TwinProperty::new("command");
        command.writable = true;
        command.valid_commands = Some([0, 1, 2].into_iter().collect());
        twin.merge_properties([command]);

        assert!(!twin.handle_outgoing_state_update(&actuator(9, false)));
        assert!(twin.last_sent().is_none());

        assert!(twin.handle_outgoing_state_update(&actuator(1, false)));
        assert_eq!(twin.property("command").unwrap().value.target, Value::from(1));
        assert_eq!(recorder.outgoing.lock().unwrap().len(), 1);
    }

    #[test]
    fn identity_mutators_recompute_keys_but_not_binding() {
        let mut twin = env_twin();
        twin.bound_key = Some(twin.instance_key().clone());
        let guid = twin.guid();

        twin.set_device_id("edgedevice002");
        assert_eq!(twin.data_sync_key().as_str(), "edgedevice002:LocationA:Not Set");
        assert_eq!(twin.instance_key().as_str(), format!("edgedevice002:LocationA:{guid}"));
        assert_ne!(twin.bound_key.as_ref(), Some(twin.instance_key()));
    }

    #[test]
    fn child_edges_are_leaf_only_and_first_write_wins() {
        let mut parent = env_twin();
        let mut other = env_twin();
        let mut child = env_twin();

        assert!(parent.add_connected_model_state(&mut child));
        assert!(parent.add_connected_model_state(&mut child));
        assert_eq!(parent.children().count(), 1);
        assert_eq!(child.parent(), Some(parent.instance_key()));

        assert!(!other.add_connected_model_state(&mut child));
        assert_eq!(child.parent(), Some(parent.instance_key()));

        assert!(!other.add_connected_model_state(&mut parent));

        let mut alone = env_twin();
        let mut same = alone.clone();
        assert!(!alone.add_connected_model_state(&mut same));
    }

    #[test]
    fn relink_keeps_position() {
        let mut parent = env_twin();
        let a = env_twin();
        let b = env_twin();
        let c = env_twin();
        for child in [&a, &b, &c] {
            parent.link_child(child.instance_key().clone());
        }
        let replacement = env_twin();
        parent.relink_child(b.instance_key(), replacement.instance_key().clone());

        let order: Vec<_> = parent.children().cloned().collect();
        assert_eq!(
            order,
            vec![
                a.instance_key().clone(),
                replacement.instance_key().clone(),
                c.instance_key().clone()
            ]
        );
    }
}
