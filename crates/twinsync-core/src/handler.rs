// ── Per-type-code telemetry handlers ──
//
// Twins apply telemetry generically (property name matches field name).
// Devices whose payloads need interpretation beyond that register a
// handler for their type code on the manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::model::{TelemetryEnvelope, TwinState};

pub trait TelemetryHandler: Send + Sync {
    /// Extra work after the twin has applied `envelope` itself. Returns
    /// `false` if the envelope was rejected.
    fn apply_incoming(&self, twin: &mut TwinState, envelope: &TelemetryEnvelope) -> bool;

    /// Rewrite a locally initiated update before it reaches the twin.
    /// `None` drops the update.
    fn map_outgoing(&self, _twin: &TwinState, envelope: &TelemetryEnvelope) -> Option<TelemetryEnvelope> {
        Some(envelope.clone())
    }
}

/// Handlers keyed by telemetry type code.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<i32, Arc<dyn TelemetryHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `type_id`, returning the one it replaces.
    pub fn register(
        &mut self,
        type_id: i32,
        handler: Arc<dyn TelemetryHandler>,
    ) -> Option<Arc<dyn TelemetryHandler>> {
        self.handlers.insert(type_id, handler)
    }

    pub fn get(&self, type_id: i32) -> Option<&Arc<dyn TelemetryHandler>> {
        self.handlers.get(&type_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("HandlerTable").field("type_ids", &codes).finish()
    }
}
