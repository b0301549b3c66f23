//! Queue-backed connection shared by the SSE-SC and WebSocket servers.
//!
//! `send_*` enqueue frames on a bounded channel; the protocol's writer task
//! drains it onto the wire in order. A send that cannot enqueue within the
//! write timeout disconnects the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thinghub_core::{
    NotificationMessage, ProtocolType, RequestMessage, ResponseMessage, Result, TransportError,
    WireMessage,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServerConnection;
use super::correlation::{CONNECTION_LOST, Correlator};
use crate::subscriptions::Subscriptions;

/// Identity of a connection.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Registry key.
    pub connection_id: String,
    /// Authenticated client.
    pub client_id: String,
    /// Session the token belongs to.
    pub session_id: String,
    /// Protocol spoken on the wire.
    pub protocol: ProtocolType,
    /// Peer address.
    pub remote_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Build connection info without a peer address.
    pub fn new(
        connection_id: impl Into<String>,
        client_id: impl Into<String>,
        session_id: impl Into<String>,
        protocol: ProtocolType,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_id: client_id.into(),
            session_id: session_id.into(),
            protocol,
            remote_addr: None,
        }
    }

    /// Attach the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }
}

/// A connected SSE-SC or WebSocket client.
pub struct ClientConnection {
    info: ConnectionInfo,
    tx: mpsc::Sender<WireMessage>,
    cancel: CancellationToken,
    subscriptions: Subscriptions,
    observations: Subscriptions,
    correlator: Correlator,
    write_timeout: Duration,
    /// When this connection was established.
    pub connected_at: Instant,
    last_activity: Mutex<Instant>,
    /// Frames not delivered because the connection was already closed.
    dropped_messages: AtomicU64,
    close_reason: Mutex<Option<(u16, String)>>,
}

impl ClientConnection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn channel(
        info: ConnectionInfo,
        queue_size: usize,
        write_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let now = Instant::now();
        let conn = Arc::new(Self {
            info,
            tx,
            cancel: CancellationToken::new(),
            subscriptions: Subscriptions::new(),
            observations: Subscriptions::new(),
            correlator: Correlator::new(),
            write_timeout,
            connected_at: now,
            last_activity: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            close_reason: Mutex::new(None),
        });
        (conn, rx)
    }

    /// Token cancelled when the connection closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close with a protocol-level code and reason (used by the WebSocket
    /// writer for its close frame).
    pub fn disconnect_with(&self, code: u16, reason: impl Into<String>) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some((code, reason.into()));
            }
        }
        self.disconnect();
    }

    /// Close code and reason recorded by [`Self::disconnect_with`].
    pub fn close_reason(&self) -> Option<(u16, String)> {
        self.close_reason.lock().clone()
    }

    /// Record inbound activity from the client.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Frames dropped because the connection had closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    async fn enqueue(&self, msg: WireMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            debug!(
                connection_id = %self.info.connection_id,
                message_type = msg.message_type(),
                "send on closed connection ignored"
            );
            return Ok(());
        }
        match self.tx.send_timeout(msg, self.write_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.disconnect();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    connection_id = %self.info.connection_id,
                    client_id = %self.info.client_id,
                    timeout_ms = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX),
                    "write timeout, disconnecting client"
                );
                self.disconnect();
                Err(TransportError::delivery_failed(
                    self.info.connection_id.clone(),
                    "write timeout",
                ))
            }
        }
    }
}

#[async_trait]
impl ServerConnection for ClientConnection {
    fn connection_id(&self) -> &str {
        &self.info.connection_id
    }

    fn client_id(&self) -> &str {
        &self.info.client_id
    }

    fn session_id(&self) -> &str {
        &self.info.session_id
    }

    fn protocol_type(&self) -> ProtocolType {
        self.info.protocol
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.info.remote_addr
    }

    fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    fn disconnect(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.subscriptions.clear();
        self.observations.clear();
        self.correlator.fail_all(CONNECTION_LOST);
        info!(
            connection_id = %self.info.connection_id,
            client_id = %self.info.client_id,
            protocol = %self.info.protocol,
            age_ms = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "connection closed"
        );
    }

    async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    async fn send_request(&self, req: RequestMessage) -> Result<()> {
        self.enqueue(WireMessage::Request(req)).await
    }

    async fn send_response(&self, resp: ResponseMessage) -> Result<()> {
        self.enqueue(WireMessage::Response(resp)).await
    }

    async fn send_notification(&self, notif: NotificationMessage) -> Result<()> {
        if !self.accepts_notification(&notif) {
            return Ok(());
        }
        self.enqueue(WireMessage::Notification(notif)).await
    }

    fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    fn observations(&self) -> &Subscriptions {
        &self.observations
    }

    fn correlator(&self) -> &Correlator {
        &self.correlator
    }
}
