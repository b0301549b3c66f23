//! # thinghub-auth
//!
//! Session authentication for hub clients.
//!
//! - [`Authenticator`]: the contract the transport core depends on
//! - [`JwtAuthenticator`]: HS256 session tokens with server-side revocation
//! - [`MemoryAuthnStore`]: salted password store for logins
//!
//! The transport servers hold an `Arc<dyn Authenticator>` and never look
//! inside tokens themselves.

#![deny(unsafe_code)]

pub mod authenticator;
pub mod errors;
pub mod jwt;
pub mod store;

pub use authenticator::{Authenticator, LoginToken, SessionInfo};
pub use errors::{AuthError, Result};
pub use jwt::JwtAuthenticator;
pub use store::{AuthnStore, ClientProfile, MemoryAuthnStore};
