// ── Twin domain model ──
//
// Types the synchronization core works in. Wire records from
// `twinsync-api` are converted into these at the boundary (see
// `convert`); nothing past that point sees raw payloads.

pub mod connection;
pub mod envelope;
pub mod property;
pub mod selector;
pub mod twin;

// ── Re-exports ──────────────────────────────────────────────────────

pub use connection::{ConnectionPhase, DeviceConnectionState};
pub use envelope::{ActuatorPayload, ConnectionPayload, TelemetryEnvelope, TelemetryKind, TelemetryPayload};
pub use property::{TwinProperty, ValueContainer};
pub use selector::ModelSelector;
pub use twin::{TwinListener, TwinState};
