//! Transport error taxonomy.
//!
//! Wire-layer failures terminate the affected connection and are logged
//! where they happen. Application-level failures travel to the waiting
//! consumer inside [`crate::ResponseMessage::error`]. `TransportError` is the
//! type returned by the registry and connection APIs in between.

use thiserror::Error;

/// Errors raised by the transport core.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Missing, invalid, or expired session token.
    #[error("{0}")]
    Auth(String),

    /// A new connection collided with a live one; both were closed.
    #[error("duplicate connection ID '{0}'")]
    DuplicateConnectionId(String),

    /// A subscription endpoint referenced a connection that does not exist.
    #[error("no connection with ID '{0}'")]
    SubscriptionNotFound(String),

    /// Writing to a connection failed; the connection is being removed.
    #[error("delivery to '{connection_id}' failed: {reason}")]
    DeliveryFailed {
        /// Connection the write was addressed to.
        connection_id: String,
        /// What went wrong.
        reason: String,
    },

    /// A waiter deadline expired.
    #[error("timeout waiting for response to '{0}'")]
    Timeout(String),

    /// A frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A correlation ID is already awaiting a response on this connection.
    #[error("correlation ID '{0}' is already in use")]
    DuplicateCorrelationId(String),

    /// The requested protocol or feature is not available.
    #[error("{0} not yet implemented")]
    NotImplemented(String),

    /// Invalid server configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// HTTP status code to report this error with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::DuplicateConnectionId(_) | Self::DuplicateCorrelationId(_) => 409,
            Self::SubscriptionNotFound(_) => 404,
            Self::DeliveryFailed { .. } => 502,
            Self::Timeout(_) => 504,
            Self::Protocol(_) | Self::Json(_) => 400,
            Self::NotImplemented(_) => 501,
            Self::Config(_) | Self::Io(_) => 500,
        }
    }

    /// Shorthand for a [`TransportError::DeliveryFailed`].
    pub fn delivery_failed(connection_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            connection_id: connection_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
