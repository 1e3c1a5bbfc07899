//! Error types for the remote callback.
//!
//! Every variant maps to a parcel exception code so that a failure raised on
//! the receiving side can be written into a reply and re-raised by the caller.

use crate::parcel::{
    EX_BAD_PARCELABLE, EX_ILLEGAL_ARGUMENT, EX_ILLEGAL_STATE, EX_SECURITY, EX_TRANSACTION_FAILED,
    EX_UNSUPPORTED_OPERATION,
};
use thiserror::Error;

/// Main error type for callback delivery.
#[derive(Debug, Error)]
pub enum CallbackError {
    // Protocol errors
    #[error("Interface mismatch: expected {expected}, got {actual:?}")]
    InterfaceMismatch { expected: String, actual: String },

    #[error("Unknown transaction code: {code:#x}")]
    UnknownTransaction { code: u32 },

    #[error("Malformed {field}: {message}")]
    Decode { field: String, message: String },

    #[error("Cannot encode {field}: {message}")]
    Encode { field: String, message: String },

    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Exception propagated back in an acknowledged reply.
    #[error("Remote exception ({code}): {message}")]
    Remote { code: i32, message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Remote object at {addr} is dead")]
    DeadObject { addr: String },

    // Registry errors
    #[error("set_default() called twice")]
    DuplicateRegistration,

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for callback operations.
pub type Result<T> = std::result::Result<T, CallbackError>;

impl From<std::io::Error> for CallbackError {
    fn from(err: std::io::Error) -> Self {
        CallbackError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CallbackError {
    fn from(err: serde_json::Error) -> Self {
        CallbackError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CallbackError {
    /// Create a decode error for a named field.
    pub fn decode(field: impl Into<String>, message: impl Into<String>) -> Self {
        CallbackError::Decode {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an encode error for a named field.
    pub fn encode(field: impl Into<String>, message: impl Into<String>) -> Self {
        CallbackError::Encode {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convert to the exception code written into a reply parcel.
    ///
    /// - -1: Security (interface token mismatch)
    /// - -2: Bad parcelable (malformed payload)
    /// - -3: Illegal argument
    /// - -5: Illegal state
    /// - -7: Unsupported operation (unknown transaction)
    /// - -129: Transaction failed (transport)
    pub fn to_exception_code(&self) -> i32 {
        match self {
            CallbackError::InterfaceMismatch { .. } => EX_SECURITY,

            CallbackError::Decode { .. }
            | CallbackError::Encode { .. }
            | CallbackError::Json { .. } => EX_BAD_PARCELABLE,

            CallbackError::Config { .. } | CallbackError::PayloadTooLarge { .. } => {
                EX_ILLEGAL_ARGUMENT
            }

            CallbackError::UnknownTransaction { .. } => EX_UNSUPPORTED_OPERATION,

            CallbackError::Transport { .. } | CallbackError::DeadObject { .. } => {
                EX_TRANSACTION_FAILED
            }

            CallbackError::Remote { code, .. } => *code,

            // Everything else is a broken contract on the callee's side
            _ => EX_ILLEGAL_STATE,
        }
    }

    /// Check if the send primitive itself failed, as opposed to the callee.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CallbackError::Transport { .. } | CallbackError::DeadObject { .. }
        )
    }
}
