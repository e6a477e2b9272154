// ── Core error types ──
//
// The core treats malformed telemetry, missing bindings and missing
// schemas as ordinary outcomes (false, empty, absent). Errors here are
// for callers that explicitly asked for something that cannot be done:
// a dispatcher that has been shut down, a schema file that cannot be
// read, a wire payload that cannot be decoded.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelSelector;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Event dispatcher has been shut down")]
    DispatcherUnavailable,

    // ── Schemas ──────────────────────────────────────────────────────
    #[error("Cannot read schema for {selector} at {}: {source}", path.display())]
    SchemaRead {
        selector: ModelSelector,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema: {message}")]
    SchemaParse { message: String },

    #[error("Unknown model selector: {name}")]
    UnknownSelector { name: String },

    // ── Wire-level (wrapped) ─────────────────────────────────────────
    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Invalid topic '{topic}': {reason}")]
    Topic { topic: String, reason: String },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<twinsync_api::Error> for CoreError {
    fn from(err: twinsync_api::Error) -> Self {
        match err {
            twinsync_api::Error::Decode { kind, message, .. } => CoreError::Codec {
                message: format!("{kind}: {message}"),
            },
            twinsync_api::Error::InvalidUtf8(e) => CoreError::Codec {
                message: e.to_string(),
            },
            twinsync_api::Error::Encode(e) => CoreError::Codec {
                message: e.to_string(),
            },
            twinsync_api::Error::InvalidTopic { topic, reason } => CoreError::Topic { topic, reason },
            twinsync_api::Error::NotConnected => CoreError::Transport {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_api::MessageKind;

    #[test]
    fn decode_errors_become_codec_errors() {
        let err: CoreError = twinsync_api::Error::Decode {
            kind: MessageKind::SensorMsg,
            message: "expected value".into(),
            body: "{".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Codec { ref message } if message.starts_with("SensorMsg")));
    }

    #[test]
    fn transport_errors_keep_their_message() {
        let err: CoreError = twinsync_api::Error::NotConnected.into();
        assert_eq!(err.to_string(), "Transport error: Transport is not connected");
    }
}
