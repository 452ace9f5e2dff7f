use thiserror::Error;

/// Failure of a single delivery attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server rejected the sender credentials. Retrying cannot help.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// This message can never be sent as built. Other recipients are unaffected.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Anything else (connection, TLS, temporary server errors).
    #[error("{0}")]
    Transient(String),
}

/// A recipient row that cannot be turned into a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("missing required column in CSV: '{0}'")]
    MissingField(String),

    #[error("invalid recipient address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unreadable CSV record: {0}")]
    Malformed(String),
}
