//! One-shot return channel for plain HTTP requests.
//!
//! A consumer that posts a request without an SSE-SC connection still needs
//! its answer in the HTTP response. The handler receives an
//! `HttpReplyConnection` as `reply_to`; the first terminal response sent to
//! it completes the waiting HTTP handler. Notifications are discarded.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thinghub_core::{
    NotificationMessage, ProtocolType, RequestMessage, ResponseMessage, Result, TransportError,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::ServerConnection;
use super::correlation::Correlator;
use crate::subscriptions::Subscriptions;

/// Transient connection that captures a single terminal response.
pub struct HttpReplyConnection {
    connection_id: String,
    client_id: String,
    session_id: String,
    remote_addr: Option<SocketAddr>,
    reply: Mutex<Option<oneshot::Sender<ResponseMessage>>>,
    waiter: Mutex<Option<oneshot::Receiver<ResponseMessage>>>,
    cancel: CancellationToken,
    subscriptions: Subscriptions,
    observations: Subscriptions,
    correlator: Correlator,
}

impl HttpReplyConnection {
    /// Create a reply channel for one request from `client_id`.
    pub fn new(client_id: &str, session_id: &str, remote_addr: Option<SocketAddr>) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            connection_id: format!("{client_id}-http-{}", uuid::Uuid::now_v7()),
            client_id: client_id.to_string(),
            session_id: session_id.to_string(),
            remote_addr,
            reply: Mutex::new(Some(tx)),
            waiter: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            subscriptions: Subscriptions::new(),
            observations: Subscriptions::new(),
            correlator: Correlator::new(),
        }
    }

    /// Wait for the terminal response.
    ///
    /// Returns `Timeout` when nothing arrives in time and `DeliveryFailed`
    /// when the connection was closed first. Only the first call waits.
    pub async fn wait(&self, timeout: Duration) -> Result<ResponseMessage> {
        let Some(rx) = self.waiter.lock().take() else {
            return Err(TransportError::Protocol("reply already awaited".into()));
        };
        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::delivery_failed(
                self.connection_id.clone(),
                "connection closed before the reply",
            )),
            Err(_) => Err(TransportError::Timeout(self.connection_id.clone())),
        };
        self.disconnect();
        result
    }
}

#[async_trait]
impl ServerConnection for HttpReplyConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Https
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn disconnect(&self) {
        self.cancel.cancel();
        drop(self.reply.lock().take());
    }

    async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    async fn send_request(&self, _req: RequestMessage) -> Result<()> {
        Err(TransportError::Protocol(
            "plain HTTP clients cannot receive requests".into(),
        ))
    }

    async fn send_response(&self, resp: ResponseMessage) -> Result<()> {
        if !resp.is_terminal() {
            return Ok(());
        }
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(resp);
        }
        Ok(())
    }

    async fn send_notification(&self, _notif: NotificationMessage) -> Result<()> {
        Ok(())
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
