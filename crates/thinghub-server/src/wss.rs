//! WebSocket subprotocol: full-duplex JSON envelopes.
//!
//! Each text (or UTF-8 binary) frame holds one envelope discriminated by
//! `messageType`. A frame that does not decode closes the socket with a
//! policy violation.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thinghub_core::protocol::HEADER_CONNECTION_ID;
use thinghub_core::{Operation, ProtocolType, TransportError, WireMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::{
    ClientConnection, ConnectionInfo, ServerConnection, apply_subscription_op, dispatch_response,
};
use crate::http::auth::{NO_AUTH_SESSION, authenticate, extract_token};
use crate::http::handlers::peer_addr;
use crate::http::{AppState, ClientSession, HttpServer, header_str};

/// Close code for a frame that violates the protocol.
pub const CLOSE_POLICY: u16 = 1008;
/// Close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Time the writer gets to flush and send its close frame after the reader
/// has finished.
const WRITER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// The WebSocket route. It authenticates on its own so browsers can pass
/// the token as a query parameter.
pub fn routes(path: &str) -> Router<AppState> {
    Router::new().route(path, get(upgrade_handler))
}

/// Register every request operation under the WebSocket endpoint.
pub fn register_ops(server: &mut HttpServer, path: &str) {
    let sub = Some(ProtocolType::Wss.as_str());
    for op in Operation::ALL {
        if !op.is_notification() && op != Operation::Ping {
            server.add_op(op, "GET", path, sub);
        }
    }
}

async fn upgrade_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    let session = extract_token(&headers)
        .or(query.token)
        .and_then(|token| authenticate(&state, &token));
    let Some(session) = session else {
        warn!("websocket upgrade without valid session");
        return (StatusCode::UNAUTHORIZED, NO_AUTH_SESSION).into_response();
    };
    let client_cid = header_str(&headers, HEADER_CONNECTION_ID)
        .map_or_else(|| uuid::Uuid::now_v7().to_string(), str::to_string);
    let info = ConnectionInfo::new(
        format!("{}-{client_cid}", session.client_id),
        &session.client_id,
        &session.session_id,
        ProtocolType::Wss,
    )
    .with_remote_addr(peer_addr(&extensions));

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, state, session, info))
}

/// Serve one WebSocket connection until either side closes it.
#[instrument(skip_all, fields(connection_id = %info.connection_id))]
async fn run_ws_session(socket: WebSocket, state: AppState, session: ClientSession, info: ConnectionInfo) {
    let (mut sink, stream) = socket.split();
    let (conn, rx) = ClientConnection::channel(
        info,
        state.config.send_queue_size,
        state.config.write_timeout(),
    );
    let dyn_conn: Arc<dyn ServerConnection> = conn.clone();

    if let Err(e) = state.cm.add_connection(dyn_conn.clone()) {
        warn!(error = %e, "rejecting websocket connection");
        let _ = sink.send(close_message(CLOSE_POLICY, e.to_string())).await;
        return;
    }
    info!(client_id = %session.client_id, "websocket connected");

    let writer = tokio::spawn(write_loop(sink, rx, conn.clone(), state.config.ping_interval()));
    read_loop(stream, &state, &conn, &dyn_conn).await;

    conn.disconnect();
    let _ = state.cm.remove_connection_if(&dyn_conn);
    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        debug!("websocket writer did not finish in time");
    }
    info!(client_id = %session.client_id, "websocket disconnected");
}

fn close_message(code: u16, reason: impl Into<String>) -> Message {
    let reason: String = reason.into();
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn send_envelope(sink: &mut SplitSink<WebSocket, Message>, msg: &WireMessage) -> bool {
    match msg.to_json() {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to encode websocket frame");
            true
        }
    }
}

/// Drain the outbound queue onto the socket, pinging on an interval.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<WireMessage>,
    conn: Arc<ClientConnection>,
    ping_interval: Duration,
) {
    let cancel = conn.cancel_token();
    let mut ticker = tokio::time::interval(ping_interval.max(Duration::from_secs(1)));
    // skip the immediate first tick
    let _ = ticker.tick().await;

    let mut open = true;
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if !send_envelope(&mut sink, &msg).await {
                        open = false;
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    open = false;
                    break;
                }
            }
            () = cancel.cancelled() => break,
        }
    }

    if open {
        while let Ok(msg) = rx.try_recv() {
            if !send_envelope(&mut sink, &msg).await {
                break;
            }
        }
        let (code, reason) = conn
            .close_reason()
            .unwrap_or_else(|| (CLOSE_NORMAL, "connection closed".to_string()));
        let _ = sink.send(close_message(code, reason)).await;
    }
    conn.disconnect();
}

/// Read frames until the peer closes, a frame is malformed, or the
/// connection is closed from this side.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    conn: &Arc<ClientConnection>,
    dyn_conn: &Arc<dyn ServerConnection>,
) {
    let cancel = conn.cancel_token();
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(frame)) = frame else { break };
        conn.touch();

        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("binary frame is not UTF-8");
                    conn.disconnect_with(CLOSE_POLICY, "frame is not UTF-8");
                    break;
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match WireMessage::from_json(&text) {
            Ok(msg) => handle_envelope(state, dyn_conn, msg).await,
            Err(e) => {
                let err = TransportError::Protocol(e.to_string());
                warn!(error = %err, len = text.len(), "malformed websocket frame");
                conn.disconnect_with(CLOSE_POLICY, "malformed message");
                break;
            }
        }
    }
}

/// Dispatch one inbound envelope. The sender is always the authenticated
/// client, whatever the frame claims.
async fn handle_envelope(state: &AppState, conn: &Arc<dyn ServerConnection>, msg: WireMessage) {
    let client_id = conn.client_id().to_string();
    match msg {
        WireMessage::Request(req) => {
            let req = req.with_sender(client_id);
            if let Some(resp) = apply_subscription_op(conn.as_ref(), &req) {
                let _ = conn.send_response(resp).await;
                return;
            }
            if req.operation == Operation::Ping {
                let resp = req.create_response(Some("pong".into()), None);
                let _ = conn.send_response(resp).await;
                return;
            }
            // requests run concurrently so a slow handler cannot stall
            // responses arriving on this same socket
            let handler = state.handler.clone();
            let conn = conn.clone();
            drop(tokio::spawn(async move {
                if let Some(resp) = handler.handle_request(req, conn.clone()).await {
                    if let Err(e) = conn.send_response(resp).await {
                        debug!(error = %e, "reply not delivered");
                    }
                }
            }));
        }
        WireMessage::Response(resp) => {
            let resp = resp.with_sender(client_id);
            dispatch_response(conn.clone(), resp, state.handler.as_ref()).await;
        }
        WireMessage::Notification(notif) => {
            let notif = notif.with_sender(client_id);
            state.handler.handle_notification(notif, conn.clone()).await;
        }
    }
}
