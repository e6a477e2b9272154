// twinsync-core: Digital-twin synchronization between device telemetry and twin models.
//
// Telemetry arrives as `TelemetryEnvelope`s (converted from wire records
// in `convert`). The `EventDispatcher` keeps per-device bookkeeping,
// resolves the twins bound to each envelope's data-sync key through the
// `TwinManager`/`TwinRegistry`, and fans the event out to listeners.

pub mod config;
pub mod convert;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod key;
pub mod listener;
pub mod manager;
pub mod model;
pub mod registry;
pub mod schema;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SyncConfig;
pub use dispatcher::{DispatchEvent, DispatchOutcome, DispatcherCell, EventDispatcher};
pub use error::CoreError;
pub use handler::{HandlerTable, TelemetryHandler};
pub use key::{
    DataSyncKey, InstanceKey, KEY_SEPARATOR, ModelId, PLACEHOLDER, TYPE_MODEL_TABLE,
    compute_data_sync_key, compute_instance_key, compute_model_id, selector_for_type, type_ids,
};
pub use listener::{DataContextListener, LogLevel, SystemStatusListener};
pub use manager::TwinManager;
pub use registry::{SchemaLoadReport, TwinRegistry};
pub use schema::{FileSchemaStore, ModelSchema, SchemaStore, validate_schemas};
pub use stream::EventStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ActuatorPayload, ConnectionPayload, ConnectionPhase, DeviceConnectionState, ModelSelector,
    TelemetryEnvelope, TelemetryKind, TelemetryPayload, TwinListener, TwinProperty, TwinState,
    ValueContainer,
};
