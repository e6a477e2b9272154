// ── Twin registry ──
//
// Multi-index cache of schemas and twin states. Four indices are kept
// in lock-step:
//
//   schemas                model id      -> schema text
//   twins                  instance key  -> twin state
//   instances_by_data_key  data-sync key -> instance keys (insertion order)
//   data_key_by_instance   instance key  -> data-sync key
//
// Every twin in `twins` appears under its current keys in the other two
// maps and nowhere else. Upsert is the only way a twin gets indexed, so
// rebinding (a twin whose identity changed since it was last indexed)
// is handled there: stale entries go first, then the new ones.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::key::{DataSyncKey, InstanceKey, ModelId};
use crate::model::twin::Adoption;
use crate::model::{ModelSelector, TwinState};
use crate::schema::{ContentDescriptor, ModelSchema, SchemaStore, resolve_descriptors};

/// Outcome of one schema load pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaLoadReport {
    pub loaded: Vec<ModelSelector>,
    pub failed: Vec<(ModelSelector, String)>,
}

impl SchemaLoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TwinRegistry {
    schemas: HashMap<ModelId, Arc<str>>,
    twins: HashMap<InstanceKey, TwinState>,
    instances_by_data_key: HashMap<DataSyncKey, IndexSet<InstanceKey>>,
    data_key_by_instance: HashMap<InstanceKey, DataSyncKey>,
}

impl TwinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Twins ────────────────────────────────────────────────────────

    /// Index `state` under its current keys, replacing any twin with the
    /// same instance key. If the state was previously indexed under a
    /// different instance key, that binding is removed first and parent
    /// and child edges are re-pointed to the new key.
    pub fn upsert_twin_state(&mut self, mut state: TwinState) -> &TwinState {
        let key = state.instance_key().clone();
        let data_key = state.data_sync_key().clone();

        if let Some(old_key) = state.bound_key.take() {
            if old_key != key {
                debug!(old = %old_key, new = %key, "rebinding twin state");
                self.unbind(&old_key);
                self.repoint_edges(&old_key, &key, &state);
            }
        }

        // A stale data-sync key under the same instance key.
        if let Some(previous) = self.data_key_by_instance.get(&key).cloned() {
            if previous != data_key {
                self.remove_from_data_key(&previous, &key);
            }
        }

        self.instances_by_data_key
            .entry(data_key.clone())
            .or_default()
            .insert(key.clone());
        self.data_key_by_instance.insert(key.clone(), data_key);
        state.bound_key = Some(key.clone());

        match self.twins.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(state);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(state),
        }
    }

    /// Twins subscribed to `data_key`, in the order they were first indexed.
    /// GUID-qualified keys are matched on their stable form.
    pub fn lookup(&self, data_key: &DataSyncKey) -> Vec<&TwinState> {
        self.lookup_keys(data_key)
            .iter()
            .filter_map(|k| self.twins.get(k))
            .collect()
    }

    pub fn lookup_keys(&self, data_key: &DataSyncKey) -> Vec<InstanceKey> {
        let stable = data_key.to_stable();
        self.instances_by_data_key
            .get(&stable)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_twin_state(&self, key: &InstanceKey) -> bool {
        self.twins.contains_key(key)
    }

    pub fn get_twin_state(&self, key: &InstanceKey) -> Option<&TwinState> {
        self.twins.get(key)
    }

    /// Mutable access for in-place updates. Identity is not reachable
    /// through this reference; use [`rebind_twin_state`](Self::rebind_twin_state).
    pub fn get_twin_state_mut(&mut self, key: &InstanceKey) -> Option<&mut TwinState> {
        self.twins.get_mut(key)
    }

    /// Evict a twin from every index and detach it from its parent and
    /// children.
    pub fn remove_twin_state(&mut self, key: &InstanceKey) -> Option<TwinState> {
        let mut state = self.twins.remove(key)?;
        self.unbind(key);

        if let Some(parent) = state.parent().cloned() {
            if let Some(parent) = self.twins.get_mut(&parent) {
                parent.unlink_child(key);
            }
        }
        let children: Vec<InstanceKey> = state.children().cloned().collect();
        for child in &children {
            if let Some(child) = self.twins.get_mut(child) {
                child.set_parent(None);
            }
            state.unlink_child(child);
        }
        state.set_parent(None);
        state.bound_key = None;

        info!(instance_key = %key, "twin state removed");
        Some(state)
    }

    /// Move an indexed twin to a new device/location identity.
    ///
    /// Returns the twin's new instance key.
    pub fn rebind_twin_state(
        &mut self,
        key: &InstanceKey,
        device_id: &str,
        location_id: &str,
    ) -> Option<InstanceKey> {
        let mut state = self.twins.remove(key)?;
        state.set_device_id(device_id);
        state.set_location_id(location_id);
        Some(self.upsert_twin_state(state).instance_key().clone())
    }

    /// Link two indexed twins as parent and child.
    pub fn attach_child(&mut self, parent_key: &InstanceKey, child_key: &InstanceKey) -> bool {
        let (Some(parent), Some(child)) = (self.twins.get(parent_key), self.twins.get(child_key))
        else {
            debug!(parent = %parent_key, child = %child_key, "cannot attach: twin not indexed");
            return false;
        };
        match parent.adoption(child) {
            Adoption::AlreadyLinked => true,
            Adoption::Rejected(reason) => {
                debug!(parent = %parent_key, child = %child_key, reason, "child twin rejected");
                false
            }
            Adoption::Link => {
                if let Some(parent) = self.twins.get_mut(parent_key) {
                    parent.link_child(child_key.clone());
                }
                if let Some(child) = self.twins.get_mut(child_key) {
                    child.set_parent(Some(parent_key.clone()));
                }
                true
            }
        }
    }

    pub fn twins(&self) -> impl Iterator<Item = &TwinState> {
        self.twins.values()
    }

    pub(crate) fn twins_mut(&mut self) -> impl Iterator<Item = &mut TwinState> {
        self.twins.values_mut()
    }

    pub fn twin_count(&self) -> usize {
        self.twins.len()
    }

    pub fn data_key_count(&self) -> usize {
        self.instances_by_data_key.len()
    }

    pub fn instance_keys_for(&self, data_key: &DataSyncKey) -> Option<&IndexSet<InstanceKey>> {
        self.instances_by_data_key.get(data_key)
    }

    pub fn data_key_for(&self, key: &InstanceKey) -> Option<&DataSyncKey> {
        self.data_key_by_instance.get(key)
    }

    /// Check the cross-index invariant: every twin is indexed under its
    /// current keys exactly once and no index references a missing twin.
    pub fn is_consistent(&self) -> bool {
        let twins_ok = self.twins.iter().all(|(key, twin)| {
            twin.instance_key() == key
                && self.data_key_by_instance.get(key) == Some(twin.data_sync_key())
                && self
                    .instances_by_data_key
                    .get(twin.data_sync_key())
                    .is_some_and(|set| set.contains(key))
        });
        let forward_ok = self.data_key_by_instance.len() == self.twins.len()
            && self
                .data_key_by_instance
                .keys()
                .all(|k| self.twins.contains_key(k));
        let reverse_total: usize = self.instances_by_data_key.values().map(IndexSet::len).sum();
        let reverse_ok = reverse_total == self.twins.len()
            && self.instances_by_data_key.values().all(|set| !set.is_empty());
        twins_ok && forward_ok && reverse_ok
    }

    // ── Schemas ──────────────────────────────────────────────────────

    /// Load every known selector's schema from `store`.
    ///
    /// A selector that fails to load or parse is logged and skipped; any
    /// text cached for it from an earlier pass is kept.
    pub fn load_schemas(&mut self, store: &dyn SchemaStore) -> SchemaLoadReport {
        let mut report = SchemaLoadReport::default();
        for selector in ModelSelector::iter() {
            let loaded = store
                .load_schema_text(selector)
                .and_then(|text| ModelSchema::parse(&text).map(|_| text));
            match loaded {
                Ok(text) => {
                    self.schemas.insert(selector.model_id(), Arc::from(text));
                    report.loaded.push(selector);
                }
                Err(e) => {
                    warn!(%selector, error = %e, "schema load failed, keeping previous");
                    report.failed.push((selector, e.to_string()));
                }
            }
        }
        debug!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "schema load pass finished"
        );
        report
    }

    pub fn schema_text(&self, model_id: &ModelId) -> Option<Arc<str>> {
        self.schemas.get(model_id).cloned()
    }

    pub fn has_schema(&self, selector: ModelSelector) -> bool {
        self.schemas.contains_key(&selector.model_id())
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// Descriptors for `selector`, including those inherited through
    /// `extends`. Empty if the schema is not loaded.
    pub fn descriptors_for(&self, selector: ModelSelector) -> Vec<ContentDescriptor> {
        let Some(text) = self.schema_text(&selector.model_id()) else {
            return Vec::new();
        };
        let Ok(schema) = ModelSchema::parse(&text) else {
            return Vec::new();
        };
        let lookup = |id: &str| self.schemas.get(&ModelId::new(id.to_owned())).cloned();
        resolve_descriptors(&schema, &lookup)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn unbind(&mut self, key: &InstanceKey) {
        self.twins.remove(key);
        if let Some(data_key) = self.data_key_by_instance.remove(key) {
            self.remove_from_data_key(&data_key, key);
        }
    }

    fn remove_from_data_key(&mut self, data_key: &DataSyncKey, key: &InstanceKey) {
        if let Some(set) = self.instances_by_data_key.get_mut(data_key) {
            set.shift_remove(key);
            if set.is_empty() {
                self.instances_by_data_key.remove(data_key);
            }
        }
    }

    fn repoint_edges(&mut self, old_key: &InstanceKey, new_key: &InstanceKey, state: &TwinState) {
        for child in state.children() {
            if let Some(child) = self.twins.get_mut(child) {
                child.set_parent(Some(new_key.clone()));
            }
        }
        if let Some(parent) = state.parent() {
            if let Some(parent) = self.twins.get_mut(parent) {
                parent.relink_child(old_key, new_key.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::key::compute_data_sync_key;
    use pretty_assertions::assert_eq;

    fn twin(device: &str) -> TwinState {
        TwinState::new(ModelSelector::EnvSensors, device, "LocationA")
    }

    #[test]
    fn upsert_indexes_all_maps() {
        let mut registry = TwinRegistry::new();
        let key = registry.upsert_twin_state(twin("dev1")).instance_key().clone();
        let data_key = compute_data_sync_key("dev1", "LocationA", false);

        assert!(registry.has_twin_state(&key));
        assert_eq!(registry.data_key_for(&key), Some(&data_key));
        assert_eq!(registry.lookup_keys(&data_key), vec![key]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut registry = TwinRegistry::new();
        let state = twin("dev1");
        registry.upsert_twin_state(state.clone());
        let key = state.instance_key().clone();
        let first = registry.get_twin_state(&key).unwrap().clone();
        registry.upsert_twin_state(first.clone());
        registry.upsert_twin_state(first);

        assert_eq!(registry.twin_count(), 1);
        assert_eq!(registry.data_key_count(), 1);
        assert_eq!(registry.instance_keys_for(state.data_sync_key()).unwrap().len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn lookup_preserves_insertion_order() {
        let mut registry = TwinRegistry::new();
        let keys: Vec<_> = (0..3)
            .map(|_| registry.upsert_twin_state(twin("shared")).instance_key().clone())
            .collect();
        let found: Vec<_> = registry
            .lookup(&compute_data_sync_key("shared", "LocationA", false))
            .into_iter()
            .map(|t| t.instance_key().clone())
            .collect();
        assert_eq!(found, keys);
    }

    #[test]
    fn lookup_matches_guid_form_on_stable_key() {
        let mut registry = TwinRegistry::new();
        registry.upsert_twin_state(twin("dev1"));
        let guid_key = compute_data_sync_key("dev1", "LocationA", true);
        assert_eq!(registry.lookup(&guid_key).len(), 1);
        assert!(registry.lookup(&compute_data_sync_key("ghost001", "LocationA", false)).is_empty());
    }

    #[test]
    fn rebinding_moves_twin_between_keys() {
        let mut registry = TwinRegistry::new();
        let old = registry.upsert_twin_state(twin("dev1")).instance_key().clone();
        let old_data = compute_data_sync_key("dev1", "LocationA", false);
        let new_data = compute_data_sync_key("dev2", "LocationB", false);

        let new = registry.rebind_twin_state(&old, "dev2", "LocationB").unwrap();
        assert_ne!(old, new);
        assert!(registry.lookup(&old_data).is_empty());
        assert_eq!(registry.lookup_keys(&new_data), vec![new.clone()]);
        assert!(!registry.has_twin_state(&old));
        assert!(registry.instance_keys_for(&old_data).is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn rebinding_through_a_modified_clone() {
        let mut registry = TwinRegistry::new();
        let old = registry.upsert_twin_state(twin("dev1")).instance_key().clone();
        let mut copy = registry.get_twin_state(&old).unwrap().clone();
        copy.set_location_id("LocationC");
        let new = registry.upsert_twin_state(copy).instance_key().clone();

        assert_eq!(registry.twin_count(), 1);
        assert!(!registry.has_twin_state(&old));
        assert!(registry.has_twin_state(&new));
        assert!(registry.is_consistent());
    }

    #[test]
    fn rebinding_repoints_edges() {
        let mut registry = TwinRegistry::new();
        let parent = registry.upsert_twin_state(twin("gateway")).instance_key().clone();
        let child = registry.upsert_twin_state(twin("sensor")).instance_key().clone();
        assert!(registry.attach_child(&parent, &child));

        let new_child = registry.rebind_twin_state(&child, "sensor-b", "LocationA").unwrap();
        let parent_state = registry.get_twin_state(&parent).unwrap();
        assert!(parent_state.has_child(&new_child));
        assert!(!parent_state.has_child(&child));

        let new_parent = registry.rebind_twin_state(&parent, "gateway-b", "LocationA").unwrap();
        assert_eq!(
            registry.get_twin_state(&new_child).unwrap().parent(),
            Some(&new_parent)
        );
    }

    #[test]
    fn remove_detaches_everything() {
        let mut registry = TwinRegistry::new();
        let parent = registry.upsert_twin_state(twin("gateway")).instance_key().clone();
        let child = registry.upsert_twin_state(twin("sensor")).instance_key().clone();
        registry.attach_child(&parent, &child);

        let removed = registry.remove_twin_state(&parent).unwrap();
        assert_eq!(removed.children().count(), 0);
        assert_eq!(registry.get_twin_state(&child).unwrap().parent(), None);
        assert!(registry.remove_twin_state(&parent).is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn attach_rejects_unknown_and_self() {
        let mut registry = TwinRegistry::new();
        let a = registry.upsert_twin_state(twin("a")).instance_key().clone();
        let ghost = twin("ghost").instance_key().clone();
        assert!(!registry.attach_child(&a, &ghost));
        assert!(!registry.attach_child(&a, &a));
    }

    #[test]
    fn partial_schema_load_keeps_previous_text() {
        let mut registry = TwinRegistry::new();
        let mut store: HashMap<ModelSelector, String> = HashMap::new();
        store.insert(
            ModelSelector::EnvSensors,
            r#"{"@id": "dtmi:twinsync:iot:EnvSensors;1", "contents": []}"#.into(),
        );
        let report = registry.load_schemas(&store);
        assert!(!report.is_complete());
        assert_eq!(report.loaded, vec![ModelSelector::EnvSensors]);
        assert!(registry.has_schema(ModelSelector::EnvSensors));

        store.insert(ModelSelector::EnvSensors, "broken".into());
        let report = registry.load_schemas(&store);
        assert!(report.loaded.is_empty());
        assert!(registry.has_schema(ModelSelector::EnvSensors));
    }
}
