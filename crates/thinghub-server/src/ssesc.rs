//! SSE-SC: server-sent events with subscription control.
//!
//! A client opens `GET {path}` with a `connectionID` header and receives
//! every envelope for it as an SSE event named after its message type.
//! Subscription changes are plain POSTs that name the same connection ID.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Extension;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use thinghub_core::protocol::{HEADER_CONNECTION_ID, HEADER_CORRELATION_ID};
use thinghub_core::{Operation, ProtocolType, RequestMessage, TransportError, WireMessage, new_correlation_id};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{
    ClientConnection, ConnectionInfo, ServerConnection, apply_subscription_op,
};
use crate::http::handlers::{peer_addr, sse_connection_id};
use crate::http::{AppState, ClientSession, HttpError, HttpServer, header_str, write_reply};
use crate::manager::ConnectionManager;

/// Subscription control verbs accepted under the SSE-SC path.
const CONTROL_VERBS: [(&str, Operation, Operation); 4] = [
    ("subscribe", Operation::SubscribeEvent, Operation::SubscribeAllEvents),
    ("unsubscribe", Operation::UnsubscribeEvent, Operation::UnsubscribeAllEvents),
    ("observe", Operation::ObserveProperty, Operation::ObserveAllProperties),
    ("unobserve", Operation::UnobserveProperty, Operation::UnobserveAllProperties),
];

/// Name of the first event on every stream.
pub const CONNECTED_EVENT: &str = "sseping";

fn control_op(verb: &str, has_name: bool) -> Option<Operation> {
    CONTROL_VERBS
        .iter()
        .find(|(v, _, _)| *v == verb)
        .map(|&(_, one, all)| if has_name { one } else { all })
}

/// SSE-SC routes, all protected by the session middleware.
pub fn routes(path: &str) -> Router<AppState> {
    let base = path.trim_end_matches('/');
    Router::new()
        .route(base, get(connect_handler))
        .route(&format!("{base}/{{verb}}/{{thingID}}"), post(control_handler))
        .route(&format!("{base}/{{verb}}/{{thingID}}/{{name}}"), post(control_named_handler))
}

/// Register the SSE-SC operations with the HTTP server's form registry.
pub fn register_ops(server: &mut HttpServer, path: &str) {
    let base = path.trim_end_matches('/');
    let sub = Some(ProtocolType::SseSc.as_str());
    for (verb, one, all) in CONTROL_VERBS {
        server.add_op(one, "POST", &format!("{base}/{verb}/{{thingID}}/{{name}}"), sub);
        server.add_op(all, "POST", &format!("{base}/{verb}/{{thingID}}"), sub);
    }
}

/// Removes the connection when the stream is dropped.
struct StreamGuard {
    conn: Arc<ClientConnection>,
    cm: Arc<ConnectionManager>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let conn: Arc<dyn ServerConnection> = self.conn.clone();
        let _ = self.cm.remove_connection_if(&conn);
        self.conn.disconnect();
        debug!(connection_id = conn.connection_id(), "sse stream ended");
    }
}

fn to_event(msg: &WireMessage) -> Option<Event> {
    match msg.to_json() {
        Ok(json) => Some(Event::default().event(msg.message_type()).data(json)),
        Err(e) => {
            warn!(error = %e, "failed to encode sse event");
            None
        }
    }
}

fn event_stream(
    mut rx: mpsc::Receiver<WireMessage>,
    cancel: CancellationToken,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event(CONNECTED_EVENT).data("{}"));
        loop {
            let next = tokio::select! {
                msg = rx.recv() => msg,
                () = cancel.cancelled() => None,
            };
            let Some(msg) = next else { break };
            if let Some(event) = to_event(&msg) {
                yield Ok(event);
            }
        }
        // flush what was queued before the close
        while let Ok(msg) = rx.try_recv() {
            if let Some(event) = to_event(&msg) {
                yield Ok(event);
            }
        }
    }
}

/// GET {ssesc}
async fn connect_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    headers: HeaderMap,
    extensions: axum::http::Extensions,
) -> Result<Response, HttpError> {
    let Some(client_cid) = header_str(&headers, HEADER_CONNECTION_ID) else {
        return Err(HttpError(TransportError::Protocol(format!(
            "missing '{HEADER_CONNECTION_ID}' header"
        ))));
    };
    let info = ConnectionInfo::new(
        sse_connection_id(&session.client_id, client_cid),
        &session.client_id,
        &session.session_id,
        ProtocolType::SseSc,
    )
    .with_remote_addr(peer_addr(&extensions));
    let (conn, rx) = ClientConnection::channel(
        info,
        state.config.send_queue_size,
        state.config.write_timeout(),
    );
    state.cm.add_connection(conn.clone())?;
    info!(
        connection_id = conn.connection_id(),
        client_id = %session.client_id,
        "sse-sc connected"
    );

    let guard = StreamGuard {
        conn: conn.clone(),
        cm: state.cm.clone(),
    };
    let stream = event_stream(rx, conn.cancel_token(), guard);
    let interval = state.config.ping_interval().max(Duration::from_secs(1));
    let mut resp = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(interval).text("ping"))
        .into_response();
    let _ = resp
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(resp)
}

/// POST {ssesc}/{verb}/{thingID}
async fn control_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Path((verb, thing_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    control(&state, &session, &headers, &verb, thing_id, None)
}

/// POST {ssesc}/{verb}/{thingID}/{name}
async fn control_named_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Path((verb, thing_id, name)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    control(&state, &session, &headers, &verb, thing_id, Some(name))
}

fn control(
    state: &AppState,
    session: &ClientSession,
    headers: &HeaderMap,
    verb: &str,
    thing_id: String,
    name: Option<String>,
) -> Result<Response, HttpError> {
    let operation = control_op(verb, name.is_some()).ok_or_else(|| {
        HttpError(TransportError::Protocol(format!("unknown subscription verb '{verb}'")))
    })?;
    let client_cid = header_str(headers, HEADER_CONNECTION_ID).unwrap_or_default();
    let connection_id = sse_connection_id(&session.client_id, client_cid);
    let conn = state
        .cm
        .get_connection_by_connection_id(&connection_id)
        .ok_or_else(|| HttpError(TransportError::SubscriptionNotFound(connection_id)))?;

    let correlation_id = header_str(headers, HEADER_CORRELATION_ID)
        .map_or_else(new_correlation_id, str::to_string);
    let req = RequestMessage::new(operation, thing_id, name.unwrap_or_default(), None)
        .with_correlation_id(correlation_id)
        .with_sender(session.client_id.clone());
    let resp = apply_subscription_op(conn.as_ref(), &req)
        .unwrap_or_else(|| req.create_response(None, None));
    Ok(write_reply(headers, resp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use thinghub_core::{NotificationMessage, ResponseMessage};

    #[test]
    fn verbs_map_to_operations() {
        assert_eq!(control_op("subscribe", true), Some(Operation::SubscribeEvent));
        assert_eq!(control_op("subscribe", false), Some(Operation::SubscribeAllEvents));
        assert_eq!(control_op("unobserve", true), Some(Operation::UnobserveProperty));
        assert_eq!(control_op("observe", false), Some(Operation::ObserveAllProperties));
        assert_eq!(control_op("explode", true), None);
    }

    #[tokio::test]
    async fn stream_starts_with_ping_and_cleans_up_on_drop() {
        let cm = Arc::new(ConnectionManager::new());
        let info = ConnectionInfo::new("alice-c1", "alice", "s", ProtocolType::SseSc);
        let (conn, rx) = ClientConnection::channel(info, 4, Duration::from_secs(1));
        cm.add_connection(conn.clone()).unwrap();
        conn.subscribe_event("t1", "e1", "");
        conn.send_notification(NotificationMessage::new(Operation::Event, "t1", "e1", None))
            .await
            .unwrap();

        let guard = StreamGuard { conn: conn.clone(), cm: cm.clone() };
        let mut stream = Box::pin(event_stream(rx, conn.cancel_token(), guard));
        assert!(stream.next().await.is_some());
        assert_matches!(stream.next().await, Some(Ok(_)));
        drop(stream);

        assert!(!conn.is_connected());
        assert_eq!(cm.connection_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_flushes_queue_then_ends_stream() {
        let cm = Arc::new(ConnectionManager::new());
        let info = ConnectionInfo::new("alice-c2", "alice", "s", ProtocolType::SseSc);
        let (conn, rx) = ClientConnection::channel(info, 4, Duration::from_secs(1));
        cm.add_connection(conn.clone()).unwrap();
        conn.send_response(ResponseMessage::completed("r1", None)).await.unwrap();
        conn.disconnect();

        let guard = StreamGuard { conn: conn.clone(), cm: cm.clone() };
        let events: Vec<_> = event_stream(rx, conn.cancel_token(), guard).collect().await;
        // connect event plus the queued response
        assert_eq!(events.len(), 2);
        assert_eq!(cm.connection_count(), 0);
    }
}
