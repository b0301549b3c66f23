//! Server-side view of a client connection.
//!
//! Every protocol server hands the rest of the hub an
//! `Arc<dyn ServerConnection>`. The trait carries identity, the outbound
//! send path, the per-connection subscription sets, and the correlator used
//! for server-initiated requests.

pub mod client;
pub mod correlation;
pub mod reply;

use std::net::SocketAddr;

use async_trait::async_trait;
use thinghub_core::{
    NotificationMessage, Operation, ProtocolType, RequestMessage, ResponseMessage, Result,
};
use tracing::{debug, warn};

use crate::handler::MessageHandler;
use crate::subscriptions::{Subscriptions, WILDCARD};

pub use client::{ClientConnection, ConnectionInfo};
pub use correlation::{CONNECTION_LOST, Correlator, Resolution, rpc};
pub use reply::HttpReplyConnection;

/// A live connection from one client session over one protocol.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Registry key, unique across the hub.
    fn connection_id(&self) -> &str;

    /// Authenticated client owning the connection.
    fn client_id(&self) -> &str;

    /// Session the connection was opened under.
    fn session_id(&self) -> &str;

    /// Protocol the connection speaks.
    fn protocol_type(&self) -> ProtocolType;

    /// Peer address, when known.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Whether the connection still accepts writes.
    fn is_connected(&self) -> bool;

    /// Close the connection. Idempotent.
    fn disconnect(&self);

    /// Resolves once the connection is closed.
    async fn closed(&self);

    /// Queue a request for the client.
    async fn send_request(&self, req: RequestMessage) -> Result<()>;

    /// Queue a response for the client.
    async fn send_response(&self, resp: ResponseMessage) -> Result<()>;

    /// Queue a notification if this connection's subscriptions select it.
    ///
    /// A filtered-out notification is not an error. See
    /// [`accepts_notification`](Self::accepts_notification).
    async fn send_notification(&self, notif: NotificationMessage) -> Result<()>;

    /// Event subscriptions.
    fn subscriptions(&self) -> &Subscriptions;

    /// Property observations.
    fn observations(&self) -> &Subscriptions;

    /// Waiters for responses to requests sent over this connection.
    fn correlator(&self) -> &Correlator;

    /// Subscribe to an event, `+` or empty for wildcards.
    fn subscribe_event(&self, thing_id: &str, name: &str, correlation_id: &str) {
        self.subscriptions().subscribe(thing_id, name, correlation_id);
    }

    /// Remove an event subscription.
    fn unsubscribe_event(&self, thing_id: &str, name: &str) {
        self.subscriptions().unsubscribe(thing_id, name);
    }

    /// Observe a property, `+` or empty for wildcards.
    fn observe_property(&self, thing_id: &str, name: &str, correlation_id: &str) {
        self.observations().subscribe(thing_id, name, correlation_id);
    }

    /// Remove a property observation.
    fn unobserve_property(&self, thing_id: &str, name: &str) {
        self.observations().unsubscribe(thing_id, name);
    }

    /// Whether this connection's subscriptions select `notif`.
    fn accepts_notification(&self, notif: &NotificationMessage) -> bool {
        match notif.operation {
            Operation::Event => self.subscriptions().is_subscribed(&notif.thing_id, &notif.name),
            Operation::UpdateProperty => {
                self.observations().is_subscribed(&notif.thing_id, &notif.name)
            }
            // TD updates go to anyone following every event of the thing
            Operation::UpdateTd => self.subscriptions().is_subscribed(&notif.thing_id, WILDCARD),
            other => {
                warn!(
                    connection_id = self.connection_id(),
                    operation = %other,
                    thing_id = %notif.thing_id,
                    "dropping notification with unsupported operation"
                );
                false
            }
        }
    }
}

/// Apply a subscribe/observe control request to `conn`.
///
/// Returns the completed response, or `None` when `req` is not a
/// subscription control operation. The `*all*` variants act on name `+`.
pub fn apply_subscription_op(conn: &dyn ServerConnection, req: &RequestMessage) -> Option<ResponseMessage> {
    let thing_id = req.thing_id.as_str();
    let cid = req.correlation_id.as_str();
    match req.operation {
        Operation::SubscribeEvent => conn.subscribe_event(thing_id, &req.name, cid),
        Operation::SubscribeAllEvents => conn.subscribe_event(thing_id, WILDCARD, cid),
        Operation::UnsubscribeEvent => conn.unsubscribe_event(thing_id, &req.name),
        Operation::UnsubscribeAllEvents => conn.unsubscribe_event(thing_id, WILDCARD),
        Operation::ObserveProperty => conn.observe_property(thing_id, &req.name, cid),
        Operation::ObserveAllProperties => conn.observe_property(thing_id, WILDCARD, cid),
        Operation::UnobserveProperty => conn.unobserve_property(thing_id, &req.name),
        Operation::UnobserveAllProperties => conn.unobserve_property(thing_id, WILDCARD),
        _ => return None,
    }
    debug!(
        connection_id = conn.connection_id(),
        operation = %req.operation,
        thing_id,
        name = %req.name,
        "subscription updated"
    );
    Some(req.create_response(None, None))
}

/// Route an inbound response: waiters first, then the application handler.
pub async fn dispatch_response(
    conn: std::sync::Arc<dyn ServerConnection>,
    resp: ResponseMessage,
    handler: &dyn MessageHandler,
) {
    match conn.correlator().resolve(resp) {
        Resolution::Delivered => {}
        Resolution::Progress(resp) | Resolution::Unmatched(resp) => {
            handler.handle_response(resp, conn).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use thinghub_core::{ResponseStatus, WireMessage};
    use tokio::sync::mpsc;

    use crate::handler::MockMessageHandler;

    fn make_conn() -> (Arc<ClientConnection>, mpsc::Receiver<WireMessage>) {
        let info = ConnectionInfo::new("c1", "alice", "s1", ProtocolType::Wss);
        ClientConnection::channel(info, 8, Duration::from_secs(1))
    }

    fn request(op: Operation, thing: &str, name: &str) -> RequestMessage {
        RequestMessage::new(op, thing, name, None).with_correlation_id("r1")
    }

    #[test]
    fn subscribe_event_then_accepts() {
        let (conn, _rx) = make_conn();
        let resp = apply_subscription_op(conn.as_ref(), &request(Operation::SubscribeEvent, "t1", "e1")).unwrap();
        assert_eq!(resp.status, ResponseStatus::Completed);
        assert_eq!(resp.correlation_id, "r1");
        let notif = NotificationMessage::new(Operation::Event, "t1", "e1", None);
        assert!(conn.accepts_notification(&notif));
        let other = NotificationMessage::new(Operation::Event, "t1", "e2", None);
        assert!(!conn.accepts_notification(&other));
    }

    #[test]
    fn subscribe_all_uses_name_wildcard() {
        let (conn, _rx) = make_conn();
        let _ = apply_subscription_op(conn.as_ref(), &request(Operation::SubscribeAllEvents, "t1", "ignored"));
        assert!(conn.subscriptions().is_subscribed("t1", "anything"));
        let _ = apply_subscription_op(conn.as_ref(), &request(Operation::UnsubscribeAllEvents, "t1", ""));
        assert!(conn.subscriptions().is_empty());
    }

    #[test]
    fn events_and_properties_are_separate() {
        let (conn, _rx) = make_conn();
        let _ = apply_subscription_op(conn.as_ref(), &request(Operation::ObserveProperty, "t1", "temp"));
        assert!(!conn.accepts_notification(&NotificationMessage::new(Operation::Event, "t1", "temp", None)));
        assert!(conn.accepts_notification(&NotificationMessage::new(Operation::UpdateProperty, "t1", "temp", None)));
        let _ = apply_subscription_op(conn.as_ref(), &request(Operation::UnobserveProperty, "t1", "temp"));
        assert!(conn.observations().is_empty());
    }

    #[test]
    fn td_updates_need_all_events_of_thing() {
        let (conn, _rx) = make_conn();
        let td = NotificationMessage::new(Operation::UpdateTd, "t1", "", None);
        conn.subscribe_event("t1", "e1", "");
        assert!(!conn.accepts_notification(&td));
        conn.subscribe_event("t1", "+", "");
        assert!(conn.accepts_notification(&td));
    }

    #[test]
    fn unsupported_notification_is_dropped() {
        let (conn, _rx) = make_conn();
        conn.subscribe_event("+", "+", "");
        let odd = NotificationMessage::new(Operation::ReadProperty, "t1", "x", None);
        assert!(!conn.accepts_notification(&odd));
    }

    #[test]
    fn non_subscription_request_is_ignored() {
        let (conn, _rx) = make_conn();
        assert!(apply_subscription_op(conn.as_ref(), &request(Operation::InvokeAction, "t1", "a")).is_none());
    }

    #[tokio::test]
    async fn send_notification_filters_by_subscription() {
        let (conn, mut rx) = make_conn();
        conn.send_notification(NotificationMessage::new(Operation::Event, "t1", "e1", None))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        conn.subscribe_event("t1", "e1", "");
        conn.send_notification(NotificationMessage::new(Operation::Event, "t1", "e2", None))
            .await
            .unwrap();
        conn.send_notification(NotificationMessage::new(Operation::Event, "t1", "e1", None))
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_matches!(frame, WireMessage::Notification(n) if n.name == "e1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmatched_response_goes_to_handler() {
        let (conn, _rx) = make_conn();
        let mut handler = MockMessageHandler::new();
        let _ = handler
            .expect_handle_response()
            .withf(|resp, _| resp.correlation_id == "orphan")
            .times(1)
            .returning(|_, _| ());
        let conn: Arc<dyn ServerConnection> = conn;
        dispatch_response(conn, ResponseMessage::completed("orphan", None), &handler).await;
    }

    #[tokio::test]
    async fn matched_response_skips_handler() {
        let (conn, _rx) = make_conn();
        let rx = conn.correlator().open("k1").unwrap();
        let mut handler = MockMessageHandler::new();
        let _ = handler.expect_handle_response().times(0);
        let conn: Arc<dyn ServerConnection> = conn;
        dispatch_response(conn, ResponseMessage::completed("k1", None), &handler).await;
        assert_eq!(rx.await.unwrap().correlation_id, "k1");
    }
}
