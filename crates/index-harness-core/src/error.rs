//! Error types for task construction and status transitions.

use thiserror::Error;

use crate::operation::Operation;
use crate::status::ReportingState;

/// Errors raised while building a task or reading its payload back.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The payload could not be serialized into canonical JSON.
    #[error("failed to encode payload for {operation}: {source}")]
    Encode {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },

    /// The payload serialized to something other than a key/value object.
    #[error("payload for {operation} must be a key/value object")]
    PayloadNotObject { operation: Operation },

    /// The stored payload bytes could not be decoded.
    #[error("failed to decode payload of task {dedup_key}: {source}")]
    Decode {
        dedup_key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A field the operation depends on is absent from the payload.
    #[error("payload of task {dedup_key} is missing field '{field}'")]
    MissingField {
        dedup_key: String,
        field: &'static str,
    },

    /// The identifier is not part of the operation vocabulary.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
}

/// Errors raised by the task-status state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// Terminal states are absorbing.
    #[error("status {id} is already {state}; cannot move to {attempted}")]
    AlreadyTerminal {
        id: String,
        state: ReportingState,
        attempted: ReportingState,
    },
}
