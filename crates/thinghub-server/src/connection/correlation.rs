//! Request/response correlation for server-initiated RPC.
//!
//! The waiter registers a reply channel under the request's correlation ID
//! *before* the request is sent, then waits on it with a deadline. The entry
//! is removed on every path: terminal response, timeout, or connection loss.
//! Non-terminal (`pending`/`running`) responses never complete a waiter.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use thinghub_core::{RequestMessage, ResponseMessage, TransportError, new_correlation_id};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::ServerConnection;

/// Error delivered to waiters when their connection goes away.
pub const CONNECTION_LOST: &str = "connection lost";

/// Outcome of offering an inbound response to a [`Correlator`].
#[derive(Debug)]
pub enum Resolution {
    /// A waiter received the terminal response.
    Delivered,
    /// A waiter exists but the response is a progress update.
    Progress(ResponseMessage),
    /// No waiter is registered for the correlation ID.
    Unmatched(ResponseMessage),
}

#[derive(Default)]
struct CorrelatorState {
    waiters: HashMap<String, oneshot::Sender<ResponseMessage>>,
    closed: bool,
}

/// Per-connection map of correlation ID → reply channel.
#[derive(Default)]
pub struct Correlator {
    state: Mutex<CorrelatorState>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id`.
    ///
    /// Fails when the ID is already awaited or the connection is closed.
    pub fn open(&self, correlation_id: &str) -> Result<oneshot::Receiver<ResponseMessage>, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Protocol(CONNECTION_LOST.into()));
        }
        if state.waiters.contains_key(correlation_id) {
            return Err(TransportError::DuplicateCorrelationId(correlation_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        let _ = state.waiters.insert(correlation_id.to_string(), tx);
        Ok(rx)
    }

    /// Offer an inbound response to the registered waiter.
    pub fn resolve(&self, resp: ResponseMessage) -> Resolution {
        let waiter = {
            let mut state = self.state.lock();
            if !state.waiters.contains_key(&resp.correlation_id) {
                return Resolution::Unmatched(resp);
            }
            if !resp.is_terminal() {
                return Resolution::Progress(resp);
            }
            state.waiters.remove(&resp.correlation_id)
        };
        if let Some(tx) = waiter {
            if tx.send(resp).is_err() {
                debug!("waiter dropped before the response arrived");
            }
        }
        Resolution::Delivered
    }

    /// Remove a waiter without completing it. Returns whether it existed.
    pub fn close(&self, correlation_id: &str) -> bool {
        self.state.lock().waiters.remove(correlation_id).is_some()
    }

    /// Complete every waiter with a failed response and refuse new ones.
    pub fn fail_all(&self, error: &str) {
        let waiters: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.waiters.drain().collect()
        };
        for (correlation_id, tx) in waiters {
            let _ = tx.send(ResponseMessage::failed(correlation_id, error));
        }
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Whether no waiter is outstanding.
    pub fn is_empty(&self) -> bool {
        self.state.lock().waiters.is_empty()
    }
}

/// Send `req` over `conn` and wait for its terminal response.
///
/// Never returns an error: delivery failures, connection loss, and the
/// deadline all produce a locally synthesised `failed` response.
pub async fn rpc(conn: &dyn ServerConnection, mut req: RequestMessage, timeout: Duration) -> ResponseMessage {
    if req.correlation_id.is_empty() {
        req.correlation_id = new_correlation_id();
    }
    let correlation_id = req.correlation_id.clone();
    let failed = |error: String| {
        let mut resp = req.create_response(None, Some(error));
        resp.sender_id = conn.client_id().to_string();
        resp
    };

    let rx = match conn.correlator().open(&correlation_id) {
        Ok(rx) => rx,
        Err(e) => return failed(e.to_string()),
    };
    if !conn.is_connected() {
        let _ = conn.correlator().close(&correlation_id);
        return failed(CONNECTION_LOST.into());
    }
    if let Err(e) = conn.send_request(req.clone()).await {
        let _ = conn.correlator().close(&correlation_id);
        warn!(
            connection_id = conn.connection_id(),
            correlation_id = %correlation_id,
            error = %e,
            "rpc request delivery failed"
        );
        return failed(e.to_string());
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(_)) => failed(CONNECTION_LOST.into()),
        Err(_) => {
            let _ = conn.correlator().close(&correlation_id);
            debug!(
                connection_id = conn.connection_id(),
                correlation_id = %correlation_id,
                "rpc timed out"
            );
            failed(TransportError::Timeout(correlation_id).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use thinghub_core::ResponseStatus;

    #[tokio::test]
    async fn terminal_response_is_delivered_once() {
        let c = Correlator::new();
        let rx = c.open("k1").unwrap();
        assert_matches!(c.resolve(ResponseMessage::completed("k1", None)), Resolution::Delivered);
        assert_matches!(c.resolve(ResponseMessage::completed("k1", None)), Resolution::Unmatched(_));
        let resp = rx.await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Completed);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn progress_keeps_waiter() {
        let c = Correlator::new();
        let rx = c.open("k1").unwrap();
        let mut running = ResponseMessage::completed("k1", None);
        running.status = ResponseStatus::Running;
        assert_matches!(c.resolve(running), Resolution::Progress(r) if r.status == ResponseStatus::Running);
        assert_eq!(c.len(), 1);
        assert_matches!(c.resolve(ResponseMessage::failed("k1", "boom")), Resolution::Delivered);
        assert_eq!(rx.await.unwrap().error, "boom");
    }

    #[test]
    fn unknown_id_is_unmatched() {
        let c = Correlator::new();
        assert_matches!(c.resolve(ResponseMessage::completed("nope", None)), Resolution::Unmatched(_));
    }

    #[test]
    fn duplicate_open_rejected() {
        let c = Correlator::new();
        let _rx = c.open("k1").unwrap();
        assert_matches!(c.open("k1"), Err(TransportError::DuplicateCorrelationId(id)) if id == "k1");
    }

    #[test]
    fn close_removes_entry() {
        let c = Correlator::new();
        let _rx = c.open("k1").unwrap();
        assert!(c.close("k1"));
        assert!(!c.close("k1"));
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn fail_all_wakes_waiters_and_refuses_new_ones() {
        let c = Correlator::new();
        let rx1 = c.open("a").unwrap();
        let rx2 = c.open("b").unwrap();
        c.fail_all(CONNECTION_LOST);
        let r1 = rx1.await.unwrap();
        let r2 = rx2.await.unwrap();
        assert_eq!(r1.status, ResponseStatus::Failed);
        assert_eq!(r1.error, CONNECTION_LOST);
        assert_eq!(r2.correlation_id, "b");
        assert!(c.open("c").is_err());
    }
}
