//! `HttpServer`: the axum router every HTTP-hosted subprotocol plugs into.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use thinghub_auth::Authenticator;
use thinghub_core::{Operation, Result, TransportError};
use thinghub_settings::ProtocolsConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::auth::{self, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use super::forms::{Form, OpBinding};
use super::handlers::{
    AFFORDANCE_OP_PATH, AGENT_NOTIFICATION_PATH, AGENT_RESPONSE_PATH, PING_PATH, THING_OP_PATH,
    affordance_op_handler, agent_notification_handler, agent_response_handler, ping_handler,
    thing_op_handler,
};
use super::tls::{PeerAddr, TlsListener};
use crate::handler::MessageHandler;
use crate::manager::ConnectionManager;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ProtocolsConfig>,
    /// Validates session tokens.
    pub authenticator: Arc<dyn Authenticator>,
    /// Live connections.
    pub cm: Arc<ConnectionManager>,
    /// Application callback.
    pub handler: Arc<dyn MessageHandler>,
}

/// A running listener.
pub struct ServerHandle {
    /// Bound address (resolves port 0).
    pub local_addr: SocketAddr,
    /// Serve task.
    pub task: JoinHandle<()>,
}

/// HTTP binding: auth endpoints, thing requests, and the operation registry
/// that WoT forms are generated from.
pub struct HttpServer {
    state: AppState,
    ops: Vec<OpBinding>,
}

/// Operations served by the `/things` endpoints.
const THING_OPS: &[Operation] = &[
    Operation::InvokeAction,
    Operation::QueryAction,
    Operation::CancelAction,
    Operation::ReadProperty,
    Operation::WriteProperty,
    Operation::ReadAllProperties,
    Operation::ReadMultipleProperties,
    Operation::WriteMultipleProperties,
    Operation::ReadTd,
];

impl HttpServer {
    /// Create the server and register the plain HTTP operations.
    pub fn new(state: AppState) -> Self {
        let mut server = Self { state, ops: Vec::new() };
        for &op in THING_OPS {
            let path = if op.is_thing_level() {
                THING_OP_PATH.replace("{op}", op.as_str())
            } else {
                AFFORDANCE_OP_PATH.replace("{op}", op.as_str())
            };
            server.add_op(op, "POST", &path, None);
        }
        server
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Register the route serving `op`, for form generation.
    pub fn add_op(&mut self, op: Operation, method: &str, path: &str, subprotocol: Option<&str>) {
        self.ops.push(OpBinding {
            op,
            method: method.to_string(),
            path: path.to_string(),
            subprotocol: subprotocol.map(str::to_string),
        });
    }

    /// Every registered binding.
    pub fn bindings(&self) -> &[OpBinding] {
        &self.ops
    }

    /// Forms for `op` rooted at `base_url`.
    pub fn forms(&self, op: Operation, base_url: &str) -> Vec<Form> {
        self.ops
            .iter()
            .filter(|b| b.op == op)
            .map(|b| b.to_form(base_url))
            .collect()
    }

    /// Build the full router.
    ///
    /// `protected` routes sit behind the session middleware; `public` routes
    /// handle authentication themselves.
    pub fn router(&self, protected: Router<AppState>, public: Router<AppState>) -> Router {
        let mut protected = protected
            .route(PING_PATH, get(ping_handler))
            .route(THING_OP_PATH, post(thing_op_handler))
            .route(AFFORDANCE_OP_PATH, post(affordance_op_handler))
            .route(AGENT_RESPONSE_PATH, post(agent_response_handler))
            .route(AGENT_NOTIFICATION_PATH, post(agent_notification_handler));
        let mut public = public;
        if self.state.config.enable_auth_endpoints {
            protected = protected
                .route(LOGOUT_PATH, post(auth::logout_handler))
                .route(REFRESH_PATH, post(auth::refresh_handler));
            public = public.route(LOGIN_PATH, post(auth::login_handler));
        }
        let protected = protected.route_layer(middleware::from_fn_with_state(
            self.state.clone(),
            auth::require_session,
        ));

        public
            .merge(protected)
            .layer(DefaultBodyLimit::max(self.state.config.max_message_size))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

/// Bind the configured address and serve `router` until `token` is cancelled.
///
/// With `tls` the listener terminates TLS; without it plain HTTP is served.
pub async fn serve(
    config: &ProtocolsConfig,
    router: Router,
    tls: Option<Arc<ServerConfig>>,
    token: CancellationToken,
) -> Result<ServerHandle> {
    let addr = format!("{}:{}", config.http_host, config.https_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::Config(format!("cannot bind {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;
    let app = router.into_make_service_with_connect_info::<PeerAddr>();

    let task = match tls {
        Some(tls) => {
            let listener = TlsListener::new(listener, tls)?;
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
                {
                    error!(error = %e, "https server failed");
                }
            })
        }
        None => tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "http server failed");
            }
        }),
    };
    info!(%local_addr, tls = config.tls_enabled(), "http server listening");
    Ok(ServerHandle { local_addr, task })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use thinghub_auth::{JwtAuthenticator, MemoryAuthnStore};
    use thinghub_core::{
        NotificationMessage, ProtocolType, RequestMessage, ResponseMessage,
    };
    use tower::ServiceExt;

    use crate::connection::{ClientConnection, ConnectionInfo, ServerConnection};

    /// Answers `readproperty` at once, defers `invokeaction` through `reply_to`.
    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle_request(
            &self,
            req: RequestMessage,
            reply_to: Arc<dyn ServerConnection>,
        ) -> Option<ResponseMessage> {
            match req.operation {
                Operation::InvokeAction => {
                    let resp = req.create_response(req.input.clone(), None);
                    drop(tokio::spawn(async move {
                        let _ = reply_to.send_response(resp).await;
                    }));
                    None
                }
                Operation::ReadProperty if req.thing_id == "missing" => {
                    Some(req.create_response(None, Some("unknown thing 'missing'".into())))
                }
                _ => Some(req.create_response(Some(json!({"from": req.sender_id})), None)),
            }
        }

        async fn handle_response(&self, _resp: ResponseMessage, _from: Arc<dyn ServerConnection>) {}

        async fn handle_notification(&self, _notif: NotificationMessage, _from: Arc<dyn ServerConnection>) {}
    }

    fn make_state() -> (AppState, Arc<JwtAuthenticator>) {
        let store = MemoryAuthnStore::new(Duration::from_secs(3600));
        store.add_client("alice", "secret").unwrap();
        let auth = Arc::new(JwtAuthenticator::new(Arc::new(store), b"test"));
        let config = ProtocolsConfig {
            rpc_timeout_ms: 500,
            ..ProtocolsConfig::default()
        };
        let state = AppState {
            config: Arc::new(config),
            authenticator: auth.clone(),
            cm: Arc::new(ConnectionManager::new()),
            handler: Arc::new(EchoHandler),
        };
        (state, auth)
    }

    fn app(state: &AppState) -> Router {
        HttpServer::new(state.clone()).router(Router::new(), Router::new())
    }

    fn login(auth: &JwtAuthenticator) -> String {
        auth.login("alice", "secret").unwrap().token
    }

    fn post(uri: &str, token: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ── auth ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_returns_token_and_cookie() {
        let (state, _auth) = make_state();
        let req = Request::builder()
            .method("POST")
            .uri(LOGIN_PATH)
            .body(Body::from(r#"{"login":"alice","password":"secret"}"#))
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["set-cookie"].to_str().unwrap().starts_with("session="));
        let body = body_json(resp).await;
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
        assert!(body["sessionID"].is_string());
    }

    #[tokio::test]
    async fn login_with_bad_password_is_401() {
        let (state, _auth) = make_state();
        let req = Request::builder()
            .method("POST")
            .uri(LOGIN_PATH)
            .body(Body::from(r#"{"login":"alice","password":"nope"}"#))
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_without_token_is_401() {
        let (state, _auth) = make_state();
        let req = Request::builder().uri(PING_PATH).body(Body::empty()).unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(resp).await, "no auth session");
    }

    #[tokio::test]
    async fn ping_with_cookie_session() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let req = Request::builder()
            .uri(PING_PATH)
            .header("cookie", format!("session={token}"))
            .header("correlationID", "p1")
            .body(Body::empty())
            .unwrap();
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["correlationid"], "p1");
        assert_eq!(body_json(resp).await, json!("pong"));
    }

    #[tokio::test]
    async fn logout_revokes_token_and_closes_connections() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let info = ConnectionInfo::new("alice-c1", "alice", "s", ProtocolType::SseSc);
        let (conn, _rx) = ClientConnection::channel(info, 4, Duration::from_secs(1));
        state.cm.add_connection(conn.clone()).unwrap();

        let router = app(&state);
        let resp = router.clone().oneshot(post(LOGOUT_PATH, &token, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!conn.is_connected());
        assert_eq!(state.cm.connection_count(), 0);

        let resp = router.oneshot(post(LOGOUT_PATH, &token, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_returns_new_valid_token() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let resp = app(&state).oneshot(post(REFRESH_PATH, &token, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let fresh = body_json(resp).await;
        let fresh = fresh.as_str().unwrap();
        assert_eq!(auth.validate_token(fresh).unwrap().client_id, "alice");
    }

    // ── things ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn immediate_reply_is_written() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let req = post("/things/t1/readproperty/temp", &token, "");
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["status"], "completed");
        // no correlation ID was sent, so none is echoed
        assert!(!resp.headers().contains_key("correlationid"));
        assert_eq!(body_json(resp).await, json!({"from": "alice"}));
    }

    #[tokio::test]
    async fn deferred_reply_waits_on_http() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let mut req = post("/things/t1/invokeaction/go", &token, r#"{"speed":3}"#);
        let _ = req.headers_mut().insert("correlationid", "inv-1".parse().unwrap());
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["correlationid"], "inv-1");
        assert_eq!(body_json(resp).await, json!({"speed": 3}));
    }

    #[tokio::test]
    async fn failed_reply_is_500_text() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let resp = app(&state)
            .oneshot(post("/things/missing/readproperty/x", &token, ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.headers()["status"], "failed");
        assert_eq!(body_text(resp).await, "unknown thing 'missing'");
    }

    #[tokio::test]
    async fn unknown_operation_is_400() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let resp = app(&state)
            .oneshot(post("/things/t1/explode/x", &token, ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let resp = app(&state)
            .oneshot(post("/things/t1/writeproperty/x", &token, "{nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn subscription_without_sse_connection_is_404() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let mut req = post("/things/t1/subscribeevent/e1", &token, "");
        let _ = req.headers_mut().insert("connectionid", "c9".parse().unwrap());
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn request_with_sse_channel_may_reply_pending() {
        let (state, auth) = make_state();
        let token = login(&auth);
        let info = ConnectionInfo::new("alice-c1", "alice", "s", ProtocolType::SseSc);
        let (conn, mut rx) = ClientConnection::channel(info, 4, Duration::from_secs(1));
        state.cm.add_connection(conn).unwrap();

        let mut req = post("/things/t1/invokeaction/go", &token, "1");
        let _ = req.headers_mut().insert("connectionid", "c1".parse().unwrap());
        let resp = app(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["status"], "pending");
        // the deferred answer arrives over the SSE queue
        assert!(rx.recv().await.is_some());
    }

    // ── forms ─────────────────────────────────────────────────────────────

    #[test]
    fn default_bindings_cover_thing_ops() {
        let (state, _auth) = make_state();
        let server = HttpServer::new(state);
        let forms = server.forms(Operation::ReadAllProperties, "https://hub:8444");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].href, "https://hub:8444/things/{thingID}/readallproperties");
        let forms = server.forms(Operation::InvokeAction, "https://hub:8444");
        assert_eq!(forms[0].href, "https://hub:8444/things/{thingID}/invokeaction/{name}");
    }
}
