//! Auth error types.

/// Errors that can occur during authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown client or wrong password.
    #[error("invalid login for client '{0}'")]
    InvalidCredentials(String),

    /// The token failed signature, expiry, or session checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The client is not known to the credential store.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A token presented for refresh belongs to a different client.
    #[error("token client '{token_client}' differs from client '{client}'")]
    ClientMismatch {
        /// Client named in the token.
        token_client: String,
        /// Client asking for the refresh.
        client: String,
    },

    /// The client already exists in the credential store.
    #[error("client already exists: {0}")]
    AlreadyExists(String),

    /// Token encoding failed.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
