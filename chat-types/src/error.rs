//! Error types for the relaychat wire format.

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame is not valid JSON or not a valid envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope's `type` is not one this client understands.
    #[error("unknown event type: {0}")]
    UnknownType(String),

    /// The envelope's `payload` does not match its `type`.
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        /// The envelope type whose payload failed to decode.
        kind: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Serializing an outbound envelope failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownType("presence.update".into());
        assert_eq!(err.to_string(), "unknown event type: presence.update");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
