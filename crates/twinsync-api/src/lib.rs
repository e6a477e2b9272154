// twinsync-api: Wire-level collaborators for the twin synchronization core.
//
// Everything that touches bytes lives here: the camelCase JSON records
// devices publish, the tolerant envelope codec, topic naming, and the
// publish/subscribe transport seam. `twinsync-core` converts these into
// its own domain types and never sees raw payloads.

pub mod codec;
pub mod error;
pub mod topic;
pub mod transport;
pub mod wire;

pub use error::Error;
pub use topic::{MessageKind, Topic};
pub use transport::{InboundMessage, LoopbackTransport, RetryConfig, Transport};
pub use wire::{
    ActuatorDataWire, ConnectionStateDataWire, SensorDataWire, SystemPerformanceDataWire,
    WireHeader, WireRecord,
};
