// ── Twin manager ──
//
// Factory and facade over the registry: builds twins from schema
// descriptors, routes telemetry to them, and runs registered per-type
// handlers after each twin has applied an envelope.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::handler::{HandlerTable, TelemetryHandler};
use crate::key::{DataSyncKey, InstanceKey};
use crate::model::{ModelSelector, TelemetryEnvelope, TwinListener, TwinProperty, TwinState};
use crate::registry::{SchemaLoadReport, TwinRegistry};
use crate::schema::{ContentDescriptor, FileSchemaStore, SchemaStore};

#[derive(Debug, Default)]
pub struct TwinManager {
    registry: TwinRegistry,
    handlers: HandlerTable,
}

impl TwinManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: HandlerTable) -> Self {
        Self {
            registry: TwinRegistry::new(),
            handlers,
        }
    }

    pub fn registry(&self) -> &TwinRegistry {
        &self.registry
    }

    pub fn register_handler(&mut self, type_id: i32, handler: Arc<dyn TelemetryHandler>) {
        if self.handlers.register(type_id, handler).is_some() {
            debug!(type_id, "replaced telemetry handler");
        }
    }

    // ── Construction ─────────────────────────────────────────────────

    /// Build a twin subscribed to `data_key` and index it.
    ///
    /// If the selector's schema is not loaded yet the twin starts with an
    /// empty property table; a later successful schema load fills it.
    pub fn create_twin_state(
        &mut self,
        data_key: &DataSyncKey,
        selector: ModelSelector,
        listener: Option<Arc<dyn TwinListener>>,
    ) -> InstanceKey {
        self.create_twin_state_for(data_key.device_id(), data_key.location_id(), selector, listener)
    }

    pub fn create_twin_state_for(
        &mut self,
        device_id: &str,
        location_id: &str,
        selector: ModelSelector,
        listener: Option<Arc<dyn TwinListener>>,
    ) -> InstanceKey {
        let mut state = TwinState::new(selector, device_id, location_id);
        if let Some(listener) = listener {
            state = state.with_listener(listener);
        }
        let added = populate(&self.registry, &mut state);

        let key = self.registry.upsert_twin_state(state).instance_key().clone();
        info!(instance_key = %key, %selector, properties = added, "twin state created");
        key
    }

    // ── Telemetry ────────────────────────────────────────────────────

    /// Apply `envelope` to every twin subscribed to its data-sync key.
    /// Returns the keys of the twins that accepted it, in fan-out order.
    pub fn dispatch_incoming(&mut self, envelope: &TelemetryEnvelope) -> Vec<InstanceKey> {
        let keys = self.registry.lookup_keys(&envelope.data_sync_key());
        if keys.is_empty() {
            debug!(data_sync_key = %envelope.data_sync_key(), "no twin bound");
            return Vec::new();
        }

        let handler = self.handlers.get(envelope.type_id).cloned();
        let mut updated = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(twin) = self.registry.get_twin_state_mut(&key) else {
                continue;
            };
            let mut accepted = twin.handle_incoming_telemetry(envelope);
            if accepted {
                if let Some(handler) = &handler {
                    accepted = handler.apply_incoming(twin, envelope);
                }
            }
            if accepted {
                updated.push(key);
            }
        }
        updated
    }

    pub fn handle_incoming_telemetry(&mut self, envelope: &TelemetryEnvelope) -> bool {
        !self.dispatch_incoming(envelope).is_empty()
    }

    pub fn handle_outgoing_state_update(
        &mut self,
        key: &InstanceKey,
        envelope: &TelemetryEnvelope,
    ) -> bool {
        let handler = self.handlers.get(envelope.type_id).cloned();
        let Some(twin) = self.registry.get_twin_state_mut(key) else {
            warn!(instance_key = %key, "outgoing update for unknown twin");
            return false;
        };
        match handler {
            Some(handler) => match handler.map_outgoing(twin, envelope) {
                Some(mapped) => twin.handle_outgoing_state_update(&mapped),
                None => {
                    debug!(instance_key = %key, type_id = envelope.type_id, "outgoing update dropped by handler");
                    false
                }
            },
            None => twin.handle_outgoing_state_update(envelope),
        }
    }

    // ── Schemas ──────────────────────────────────────────────────────

    pub fn load_schemas(&mut self, store: &dyn SchemaStore) -> bool {
        self.load_schemas_report(store).is_complete()
    }

    /// Load schemas, then refresh every twin whose selector loaded:
    /// schema text is replaced and missing properties are added.
    pub fn load_schemas_report(&mut self, store: &dyn SchemaStore) -> SchemaLoadReport {
        let report = self.registry.load_schemas(store);

        let refreshed: HashMap<ModelSelector, (Option<Arc<str>>, Vec<ContentDescriptor>)> = report
            .loaded
            .iter()
            .map(|selector| {
                (
                    *selector,
                    (
                        self.registry.schema_text(&selector.model_id()),
                        self.registry.descriptors_for(*selector),
                    ),
                )
            })
            .collect();

        for twin in self.registry.twins_mut() {
            if let Some((text, descriptors)) = refreshed.get(&twin.selector()) {
                twin.set_schema_text(text.clone());
                let added = twin.merge_properties(descriptors.iter().map(TwinProperty::from_descriptor));
                if added > 0 {
                    debug!(instance_key = %twin.instance_key(), added, "twin properties populated");
                }
            }
        }
        report
    }

    pub fn load_schemas_from_path(&mut self, dir: &Path) -> bool {
        self.load_schemas(&FileSchemaStore::new(dir))
    }

    // ── Registry delegation ──────────────────────────────────────────

    pub fn lookup(&self, data_key: &DataSyncKey) -> Vec<&TwinState> {
        self.registry.lookup(data_key)
    }

    pub fn get_twin_state(&self, key: &InstanceKey) -> Option<&TwinState> {
        self.registry.get_twin_state(key)
    }

    pub fn get_twin_state_mut(&mut self, key: &InstanceKey) -> Option<&mut TwinState> {
        self.registry.get_twin_state_mut(key)
    }

    pub fn upsert_twin_state(&mut self, state: TwinState) -> &TwinState {
        self.registry.upsert_twin_state(state)
    }

    pub fn rebind_twin_state(
        &mut self,
        key: &InstanceKey,
        device_id: &str,
        location_id: &str,
    ) -> Option<InstanceKey> {
        self.registry.rebind_twin_state(key, device_id, location_id)
    }

    pub fn attach_child(&mut self, parent: &InstanceKey, child: &InstanceKey) -> bool {
        self.registry.attach_child(parent, child)
    }

    pub fn remove_twin_state(&mut self, key: &InstanceKey) -> Option<TwinState> {
        self.registry.remove_twin_state(key)
    }
}

/// Fill `state` from the registry's schema cache. Returns the number of
/// properties added.
fn populate(registry: &TwinRegistry, state: &mut TwinState) -> usize {
    let selector = state.selector();
    state.set_schema_text(registry.schema_text(&selector.model_id()));
    let descriptors = registry.descriptors_for(selector);
    state.merge_properties(descriptors.iter().map(TwinProperty::from_descriptor))
}
