//! The contract every session authenticator satisfies.
//!
//! The transport core treats tokens as opaque strings. It only ever asks an
//! [`Authenticator`] to turn a token back into an identity, and delegates
//! login, logout, and refresh to it from the HTTP auth endpoints.

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Identity recovered from a valid session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Authenticated client.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Session the token belongs to.
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

impl SessionInfo {
    /// Build a session, substituting the client ID for a missing session ID.
    ///
    /// Service tokens carry no session; their identity doubles as the
    /// session, which limits a service to one active session.
    pub fn new(client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let mut session_id = session_id.into();
        if session_id.is_empty() {
            session_id.clone_from(&client_id);
        }
        Self {
            client_id,
            session_id,
        }
    }

    /// Whether this is a service identity (session ID equals client ID).
    pub fn is_service(&self) -> bool {
        self.session_id == self.client_id
    }
}

/// Token and session returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginToken {
    /// Bearer token to present on subsequent requests.
    pub token: String,
    /// Session the token is bound to.
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

/// Issues and validates session tokens.
pub trait Authenticator: Send + Sync {
    /// Verify a password and open a new session.
    fn login(&self, client_id: &str, password: &str) -> Result<LoginToken>;

    /// Revoke every session of the client.
    fn logout(&self, client_id: &str);

    /// Issue a new token for the session of `old_token`.
    ///
    /// `old_token` must be valid and belong to `client_id`.
    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String>;

    /// Recover the identity behind a token.
    fn validate_token(&self, token: &str) -> Result<SessionInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_becomes_client_id() {
        let info = SessionInfo::new("svc-history", "");
        assert_eq!(info.session_id, "svc-history");
        assert!(info.is_service());
    }

    #[test]
    fn user_session_is_not_service() {
        let info = SessionInfo::new("alice", "s-123");
        assert_eq!(info.session_id, "s-123");
        assert!(!info.is_service());
    }

    #[test]
    fn login_token_wire_names() {
        let tok = LoginToken {
            token: "abc".into(),
            session_id: "s1".into(),
        };
        let v = serde_json::to_value(&tok).unwrap();
        assert_eq!(v["token"], "abc");
        assert_eq!(v["sessionID"], "s1");
    }
}
