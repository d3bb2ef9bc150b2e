//! Signaling Errors

use thiserror::Error;

use crate::protocol::SignalType;

/// Errors raised while decoding or encoding signals.
#[derive(Debug, Error)]
pub enum Error {
    /// The signal type requires a payload but `Data` was empty.
    #[error("{0:?} signal carries no payload")]
    MissingPayload(SignalType),

    /// The payload did not match the shape expected for its type.
    #[error("invalid {signal_type:?} payload: {source}")]
    InvalidPayload {
        /// Type of the offending signal.
        signal_type: SignalType,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The relay sent a type this client does not understand.
    #[error("unknown signal type")]
    UnknownSignalType,

    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias for signaling operations.
pub type Result<T> = std::result::Result<T, Error>;
