//! # thinghub-server
//!
//! Protocol gateway between `WoT` consumers and agents.
//!
//! - **Connections**: the [`ServerConnection`] trait, per-connection
//!   subscriptions, and request/response correlation
//! - **Registry**: [`ConnectionManager`] indexes connections and fans out
//!   notifications
//! - **HTTPS base**: axum router with session middleware, login endpoints,
//!   thing requests, and TLS via rustls
//! - **Subprotocols**: SSE-SC (server-sent events with subscription control)
//!   and WebSocket
//! - **Aggregation**: [`TransportManager`] builds the enabled servers and
//!   reports connect URLs, forms, and discovery records
//! - **Routing**: [`HubRouter`] forwards consumer requests to agents

#![deny(unsafe_code)]

pub mod connection;
pub mod discovery;
pub mod handler;
pub mod http;
pub mod hub;
pub mod manager;
pub mod shutdown;
pub mod ssesc;
pub mod subscriptions;
pub mod transport;
pub mod wss;

pub use connection::{
    CONNECTION_LOST, ClientConnection, ConnectionInfo, HttpReplyConnection, ServerConnection, rpc,
};
pub use discovery::{DiscoveryPublisher, DiscoveryRecord, LogPublisher};
pub use handler::MessageHandler;
pub use hub::HubRouter;
pub use manager::ConnectionManager;
pub use shutdown::ShutdownCoordinator;
pub use subscriptions::Subscriptions;
pub use transport::TransportManager;
