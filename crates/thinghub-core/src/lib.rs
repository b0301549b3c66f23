//! # thinghub-core
//!
//! Shared vocabulary for the thinghub transport core.
//!
//! - **Envelopes**: [`RequestMessage`], [`ResponseMessage`], [`NotificationMessage`]
//!   and the framed [`WireMessage`] union carried over SSE-SC and WebSocket
//! - **Operations**: [`Operation`] as a tagged union over the `WoT` vocabulary
//! - **Protocols**: [`ProtocolType`] and the HTTP header names shared by all servers
//! - **Errors**: [`TransportError`] taxonomy via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod messages;
pub mod operations;
pub mod protocol;

pub use errors::{Result, TransportError};
pub use messages::{
    NotificationMessage, RequestMessage, ResponseMessage, ResponseStatus, WireMessage,
    new_correlation_id, now_timestamp,
};
pub use operations::Operation;
pub use protocol::ProtocolType;
