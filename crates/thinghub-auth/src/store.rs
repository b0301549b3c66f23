//! In-memory credential store.
//!
//! Passwords are kept as base64-encoded SHA-256 digests over a per-client
//! random salt. The store lives only as long as the process.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{AuthError, Result};

/// Public profile of a known client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientProfile {
    /// Client ID.
    pub client_id: String,
    /// Session token validity for this client.
    pub token_validity: Duration,
}

/// Verifies client passwords.
pub trait AuthnStore: Send + Sync {
    /// Check a password and return the client's profile.
    fn verify_password(&self, client_id: &str, password: &str) -> Result<ClientProfile>;

    /// Profile of a known client.
    fn get_profile(&self, client_id: &str) -> Result<ClientProfile>;
}

struct ClientRecord {
    salt: [u8; 16],
    password_hash: String,
    token_validity: Duration,
}

/// Credential store held in memory.
pub struct MemoryAuthnStore {
    clients: RwLock<HashMap<String, ClientRecord>>,
    default_validity: Duration,
}

impl MemoryAuthnStore {
    /// Create an empty store.
    pub fn new(default_validity: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            default_validity,
        }
    }

    /// Add a client with the default token validity.
    pub fn add_client(&self, client_id: &str, password: &str) -> Result<()> {
        self.add_client_with_validity(client_id, password, self.default_validity)
    }

    /// Add a client with a specific token validity.
    pub fn add_client_with_validity(
        &self,
        client_id: &str,
        password: &str,
        token_validity: Duration,
    ) -> Result<()> {
        let mut clients = self.clients.write();
        if clients.contains_key(client_id) {
            return Err(AuthError::AlreadyExists(client_id.to_string()));
        }
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        let record = ClientRecord {
            salt,
            password_hash: hash_password(&salt, password),
            token_validity,
        };
        let _ = clients.insert(client_id.to_string(), record);
        Ok(())
    }

    /// Replace a client's password.
    pub fn set_password(&self, client_id: &str, password: &str) -> Result<()> {
        let mut clients = self.clients.write();
        let record = clients
            .get_mut(client_id)
            .ok_or_else(|| AuthError::UnknownClient(client_id.to_string()))?;
        rand::rng().fill_bytes(&mut record.salt);
        record.password_hash = hash_password(&record.salt, password);
        Ok(())
    }

    /// Remove a client. Returns whether it existed.
    pub fn remove_client(&self, client_id: &str) -> bool {
        self.clients.write().remove(client_id).is_some()
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether the store has no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl AuthnStore for MemoryAuthnStore {
    fn verify_password(&self, client_id: &str, password: &str) -> Result<ClientProfile> {
        let clients = self.clients.read();
        let record = clients
            .get(client_id)
            .ok_or_else(|| AuthError::InvalidCredentials(client_id.to_string()))?;
        if hash_password(&record.salt, password) != record.password_hash {
            return Err(AuthError::InvalidCredentials(client_id.to_string()));
        }
        Ok(ClientProfile {
            client_id: client_id.to_string(),
            token_validity: record.token_validity,
        })
    }

    fn get_profile(&self, client_id: &str) -> Result<ClientProfile> {
        let clients = self.clients.read();
        let record = clients
            .get(client_id)
            .ok_or_else(|| AuthError::UnknownClient(client_id.to_string()))?;
        Ok(ClientProfile {
            client_id: client_id.to_string(),
            token_validity: record.token_validity,
        })
    }
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store() -> MemoryAuthnStore {
        MemoryAuthnStore::new(Duration::from_secs(3600))
    }

    #[test]
    fn verify_correct_password() {
        let s = store();
        s.add_client("alice", "secret").unwrap();
        let profile = s.verify_password("alice", "secret").unwrap();
        assert_eq!(profile.client_id, "alice");
        assert_eq!(profile.token_validity, Duration::from_secs(3600));
    }

    #[test]
    fn wrong_password_rejected() {
        let s = store();
        s.add_client("alice", "secret").unwrap();
        assert_matches!(
            s.verify_password("alice", "guess"),
            Err(AuthError::InvalidCredentials(id)) if id == "alice"
        );
    }

    #[test]
    fn unknown_client_is_invalid_login() {
        let s = store();
        assert_matches!(
            s.verify_password("mallory", "x"),
            Err(AuthError::InvalidCredentials(_))
        );
    }

    #[test]
    fn duplicate_client_rejected() {
        let s = store();
        s.add_client("alice", "a").unwrap();
        assert_matches!(s.add_client("alice", "b"), Err(AuthError::AlreadyExists(_)));
    }

    #[test]
    fn same_password_different_salt() {
        let s = store();
        s.add_client("a", "pw").unwrap();
        s.add_client("b", "pw").unwrap();
        let clients = s.clients.read();
        assert_ne!(clients["a"].password_hash, clients["b"].password_hash);
    }

    #[test]
    fn set_password_replaces_old() {
        let s = store();
        s.add_client("alice", "old").unwrap();
        s.set_password("alice", "new").unwrap();
        assert!(s.verify_password("alice", "old").is_err());
        assert!(s.verify_password("alice", "new").is_ok());
    }

    #[test]
    fn remove_client() {
        let s = store();
        s.add_client("alice", "pw").unwrap();
        assert_eq!(s.len(), 1);
        assert!(s.remove_client("alice"));
        assert!(!s.remove_client("alice"));
        assert!(s.is_empty());
    }

    #[test]
    fn custom_validity() {
        let s = store();
        s.add_client_with_validity("svc", "pw", Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            s.get_profile("svc").unwrap().token_validity,
            Duration::from_secs(60)
        );
    }
}
