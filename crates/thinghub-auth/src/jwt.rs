//! HS256 session tokens.
//!
//! Tokens carry the client and session IDs as custom claims. A token is only
//! accepted while its session is active: logout closes every session of the
//! client, which revokes tokens that have not yet expired.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authenticator::{Authenticator, LoginToken, SessionInfo};
use crate::errors::{AuthError, Result};
use crate::store::AuthnStore;

/// Claims carried by a session token.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(rename = "clientID")]
    client_id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    iat: u64,
    exp: u64,
}

/// Session authenticator backed by signed JWTs.
pub struct JwtAuthenticator {
    store: Arc<dyn AuthnStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    /// Active sessions: session ID → client ID.
    sessions: DashMap<String, String>,
}

impl JwtAuthenticator {
    /// Create an authenticator signing with `secret`.
    pub fn new(store: Arc<dyn AuthnStore>, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            sessions: DashMap::new(),
        }
    }

    /// Create an authenticator with a random signing secret.
    ///
    /// Tokens do not survive a restart, matching the in-memory session table.
    pub fn with_random_secret(store: Arc<dyn AuthnStore>) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        debug!("generated random session signing secret");
        Self::new(store, &secret)
    }

    /// Issue a token for `client_id` bound to `session_id`.
    ///
    /// An empty `session_id` issues a service token whose session is the
    /// client ID itself.
    pub fn create_session_token(
        &self,
        client_id: &str,
        session_id: &str,
        validity: Duration,
    ) -> Result<String> {
        let info = SessionInfo::new(client_id, session_id);
        let now = now_secs();
        self.issue(&info, now, now.saturating_add(validity.as_secs()))
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn issue(&self, info: &SessionInfo, iat: u64, exp: u64) -> Result<String> {
        let claims = SessionClaims {
            sub: info.client_id.clone(),
            client_id: info.client_id.clone(),
            session_id: info.session_id.clone(),
            iat,
            exp,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        let _ = self
            .sessions
            .insert(info.session_id.clone(), info.client_id.clone());
        Ok(token)
    }

    fn decode(&self, token: &str) -> Result<SessionInfo> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        if claims.sub != claims.client_id {
            return Err(AuthError::InvalidToken("subject does not match client".into()));
        }
        Ok(SessionInfo::new(claims.client_id, claims.session_id))
    }
}

impl Authenticator for JwtAuthenticator {
    fn login(&self, client_id: &str, password: &str) -> Result<LoginToken> {
        let profile = self.store.verify_password(client_id, password)?;
        let session_id = uuid::Uuid::now_v7().to_string();
        let token = self.create_session_token(client_id, &session_id, profile.token_validity)?;
        info!(client_id, session_id = %session_id, "client logged in");
        Ok(LoginToken { token, session_id })
    }

    fn logout(&self, client_id: &str) {
        let before = self.sessions.len();
        self.sessions.retain(|_, owner| owner != client_id);
        info!(
            client_id,
            revoked = before.saturating_sub(self.sessions.len()),
            "client logged out"
        );
    }

    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String> {
        let info = self.validate_token(old_token)?;
        if info.client_id != client_id {
            return Err(AuthError::ClientMismatch {
                token_client: info.client_id,
                client: client_id.to_string(),
            });
        }
        let validity = self.store.get_profile(client_id)?.token_validity;
        let now = now_secs();
        self.issue(&info, now, now.saturating_add(validity.as_secs()))
    }

    fn validate_token(&self, token: &str) -> Result<SessionInfo> {
        let info = self.decode(token)?;
        match self.sessions.get(&info.session_id) {
            Some(owner) if *owner == info.client_id => Ok(info),
            _ => Err(AuthError::InvalidToken("session is not active".into())),
        }
    }
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
