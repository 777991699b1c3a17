//! Error types for the EVSE client.

use evse_at_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Writing a command to the link failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading from the link failed.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The link is gone.
    #[error("transport disconnected")]
    Disconnected,
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML syntax or schema error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Update interval outside the accepted bounds.
    #[error("update interval {value_ms} ms is outside [{min_ms}, {max_ms}] ms")]
    UpdateIntervalOutOfRange { value_ms: u64, min_ms: u64, max_ms: u64 },

    /// A timeout was configured as zero.
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },

    /// The configuration names an entity the catalog does not have.
    #[error("unknown entity '{key}' in {section}")]
    UnknownEntity { key: String, section: &'static str },

    /// Subscription for an entity that is disabled or has no value.
    #[error("entity '{key}' cannot be subscribed")]
    NotSubscribable { key: String },

    /// Multiplier not applicable to the entity, or not finite and positive.
    #[error("invalid multiplier {value} for '{key}'")]
    InvalidMultiplier { key: String, value: f64 },
}

/// Errors surfaced by the EVSE client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The serial link failed. Recovery happens through the liveness resync.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Catalog or encoding error.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No entity with this key exists in the catalog.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity is known but not enabled in this client.
    #[error("entity '{0}' is not enabled")]
    Disabled(String),

    /// Set requested on a read-only entity.
    #[error("entity '{key}' is not writable")]
    NotWritable { key: String },

    /// Query requested on an entity that cannot be read.
    #[error("entity '{key}' cannot be queried")]
    NotQueryable { key: String },

    /// Press requested on an entity that is not an action.
    #[error("entity '{key}' is not an action")]
    NotAnAction { key: String },
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownEntity(key) => ClientError::UnknownEntity(key),
            ProtocolError::UnsupportedOperation { key, operation: "set" } => {
                ClientError::NotWritable { key }
            }
            ProtocolError::UnsupportedOperation { key, operation: "query" } => {
                ClientError::NotQueryable { key }
            }
            ProtocolError::UnsupportedOperation { key, operation: "press" } => {
                ClientError::NotAnAction { key }
            }
            other => ClientError::Protocol(other),
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
