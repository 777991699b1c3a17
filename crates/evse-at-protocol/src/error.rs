//! Error types for the AT protocol.

use thiserror::Error;

/// Errors that can occur when working with the AT protocol.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// No entity with this key exists in the catalog.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// A response line could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An entity descriptor failed catalog validation.
    #[error("invalid descriptor for '{key}': {reason}")]
    InvalidDescriptor {
        /// Key of the offending descriptor.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The entity cannot be used with the requested operation.
    #[error("entity '{key}' does not support {operation}")]
    UnsupportedOperation {
        /// Entity key.
        key: String,
        /// Operation name ("set", "query", "press").
        operation: &'static str,
    },

    /// The value cannot be encoded for this entity.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors raised while decoding a single inbound line.
///
/// A decode error only ever drops the line that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The line is not a `+MNEMONIC...` response.
    #[error("not a response line: {0:?}")]
    NotAResponse(String),

    /// The mnemonic is not in the catalog.
    #[error("unknown command: +{0}")]
    UnknownCommand(String),

    /// A value was required but the line carried none.
    #[error("missing payload for +{0}")]
    MissingPayload(String),

    /// The payload has fewer comma-separated fields than the descriptor expects.
    #[error("missing field {field} in payload for +{mnemonic}")]
    MissingField { mnemonic: String, field: usize },

    /// Boolean payloads must be `0` or `1`.
    #[error("invalid boolean {0:?}")]
    InvalidBoolean(String),

    /// Numeric payload failed to parse.
    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    /// Enum payload outside of the allowed set.
    #[error("value {value} is not one of the allowed states for +{mnemonic}")]
    UnknownEnumValue { mnemonic: String, value: i64 },

    /// Timestamp out of the representable range.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
