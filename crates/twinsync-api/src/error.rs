use thiserror::Error;

use crate::topic::MessageKind;

/// Top-level error type for the `twinsync-api` crate.
///
/// Covers codec, topic and transport failures. `twinsync-core` maps these
/// into its own error type; the core itself never raises on bad input.
#[derive(Debug, Error)]
pub enum Error {
    // ── Codec ───────────────────────────────────────────────────────
    /// Payload could not be decoded into the record for `kind`,
    /// with the normalized body for debugging.
    #[error("Failed to decode {kind} payload: {message}")]
    Decode {
        kind: MessageKind,
        message: String,
        body: String,
    },

    /// Payload bytes were not valid UTF-8.
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Record could not be serialized.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    // ── Topics ──────────────────────────────────────────────────────
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Operation requires an established connection.
    #[error("Transport is not connected")]
    NotConnected,
}
