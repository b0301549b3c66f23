//! Request endpoints of the HTTP binding.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Extension;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use thinghub_core::protocol::{HEADER_CONNECTION_ID, HEADER_CORRELATION_ID};
use thinghub_core::{
    NotificationMessage, Operation, RequestMessage, ResponseMessage, ResponseStatus,
    TransportError, new_correlation_id,
};
use tracing::{debug, instrument};

use super::auth::ClientSession;
use super::server::AppState;
use super::tls::PeerAddr;
use super::{HttpError, header_str, write_reply};
use crate::connection::{HttpReplyConnection, ServerConnection, apply_subscription_op, dispatch_response};

/// Request path for thing-level operations.
pub const THING_OP_PATH: &str = "/things/{thingID}/{op}";
/// Request path for affordance operations.
pub const AFFORDANCE_OP_PATH: &str = "/things/{thingID}/{op}/{name}";
/// Agents post responses to server-initiated requests here.
pub const AGENT_RESPONSE_PATH: &str = "/agent/response";
/// Agents post notifications here.
pub const AGENT_NOTIFICATION_PATH: &str = "/agent/notification";
/// Liveness check.
pub const PING_PATH: &str = "/ping";

/// Peer address, when the server was started with connect info.
pub(crate) fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions.get::<ConnectInfo<PeerAddr>>().map(|ci| ci.0.0)
}

/// Registry key of the SSE-SC connection a request refers to.
///
/// Clients send their own connection ID; the hub namespaces it by client so
/// two clients cannot collide.
pub fn sse_connection_id(client_id: &str, client_connection_id: &str) -> String {
    format!("{client_id}-{client_connection_id}")
}

/// The caller's SSE-SC connection named by the `connectionID` header.
fn return_channel(
    state: &AppState,
    session: &ClientSession,
    headers: &HeaderMap,
) -> Option<Arc<dyn ServerConnection>> {
    let cid = header_str(headers, HEADER_CONNECTION_ID)?;
    state
        .cm
        .get_connection_by_connection_id(&sse_connection_id(&session.client_id, cid))
}

fn parse_input(body: &Bytes) -> Result<Option<Value>, HttpError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| HttpError(TransportError::Protocol(format!("invalid JSON body: {e}"))))
}

/// GET /ping
pub async fn ping_handler(headers: HeaderMap) -> Response {
    let correlation_id = header_str(&headers, HEADER_CORRELATION_ID).unwrap_or_default();
    write_reply(&headers, ResponseMessage::completed(correlation_id, Some(Value::from("pong"))))
}

/// POST /things/{thingID}/{op}
pub async fn thing_op_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Path((thing_id, op)): Path<(String, String)>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    handle_thing_request(&state, &session, &headers, &extensions, thing_id, &op, String::new(), &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// POST /things/{thingID}/{op}/{name}
pub async fn affordance_op_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    Path((thing_id, op, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    handle_thing_request(&state, &session, &headers, &extensions, thing_id, &op, name, &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// Run a consumer request and write its reply.
///
/// With an SSE-SC return channel the handler may answer later over SSE, in
/// which case the HTTP reply is `200` with status `pending`. Without one the
/// HTTP request waits for the answer up to the RPC timeout.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(client_id = %session.client_id, op = %op_str, thing_id = %thing_id))]
async fn handle_thing_request(
    state: &AppState,
    session: &ClientSession,
    headers: &HeaderMap,
    extensions: &Extensions,
    thing_id: String,
    op_str: &str,
    name: String,
    body: &Bytes,
) -> Result<Response, HttpError> {
    let operation: Operation = op_str
        .parse()
        .map_err(|e: String| HttpError(TransportError::Protocol(e)))?;
    if operation.is_notification() {
        return Err(HttpError(TransportError::Protocol(format!(
            "'{operation}' is a notification; agents post it to {AGENT_NOTIFICATION_PATH}"
        ))));
    }
    let input = parse_input(body)?;
    let correlation_id = header_str(headers, HEADER_CORRELATION_ID)
        .map_or_else(new_correlation_id, str::to_string);
    let req = RequestMessage::new(operation, thing_id, name, input)
        .with_correlation_id(correlation_id)
        .with_sender(session.client_id.clone());

    if operation == Operation::Ping {
        return Ok(write_reply(headers, req.create_response(Some(Value::from("pong")), None)));
    }

    let channel = return_channel(state, session, headers);
    if operation.is_subscription_control() {
        let conn = channel.ok_or_else(|| {
            let cid = header_str(headers, HEADER_CONNECTION_ID).unwrap_or_default();
            HttpError(TransportError::SubscriptionNotFound(sse_connection_id(&session.client_id, cid)))
        })?;
        let resp = apply_subscription_op(conn.as_ref(), &req)
            .unwrap_or_else(|| req.create_response(None, None));
        return Ok(write_reply(headers, resp));
    }

    if let Some(conn) = channel {
        let pending = req.create_progress(ResponseStatus::Pending);
        return Ok(match state.handler.handle_request(req, conn).await {
            Some(resp) => write_reply(headers, resp),
            None => write_reply(headers, pending),
        });
    }

    let reply = Arc::new(HttpReplyConnection::new(
        &session.client_id,
        &session.session_id,
        peer_addr(extensions),
    ));
    let reply_to: Arc<dyn ServerConnection> = reply.clone();
    match state.handler.handle_request(req, reply_to).await {
        Some(resp) => {
            reply.disconnect();
            Ok(write_reply(headers, resp))
        }
        None => {
            debug!("waiting for deferred reply");
            let resp = reply.wait(state.config.rpc_timeout()).await?;
            Ok(write_reply(headers, resp))
        }
    }
}

/// POST /agent/response
///
/// Responses resolve waiters on the agent's SSE-SC connection when one is
/// named, else on the agent's first connection.
pub async fn agent_response_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(mut resp): Json<ResponseMessage>,
) -> Response {
    resp.sender_id.clone_from(&session.client_id);
    let conn = agent_connection(&state, &session, &headers, &extensions);
    dispatch_response(conn, resp, state.handler.as_ref()).await;
    StatusCode::OK.into_response()
}

/// POST /agent/notification
pub async fn agent_notification_handler(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(mut notif): Json<NotificationMessage>,
) -> Response {
    if !notif.operation.is_notification() {
        return HttpError(TransportError::Protocol(format!(
            "'{}' is not a notification operation",
            notif.operation
        )))
        .into_response();
    }
    notif.sender_id.clone_from(&session.client_id);
    let conn = agent_connection(&state, &session, &headers, &extensions);
    state.handler.handle_notification(notif, conn).await;
    StatusCode::OK.into_response()
}

fn agent_connection(
    state: &AppState,
    session: &ClientSession,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> Arc<dyn ServerConnection> {
    return_channel(state, session, headers)
        .or_else(|| state.cm.get_connection_by_client_id(&session.client_id))
        .unwrap_or_else(|| {
            Arc::new(HttpReplyConnection::new(
                &session.client_id,
                &session.session_id,
                peer_addr(extensions),
            ))
        })
}
