//! Session middleware and the `/authn` endpoints.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::body::Bytes;
use serde::Deserialize;
use thinghub_auth::SessionInfo;
use thinghub_core::protocol::SESSION_COOKIE;
use tracing::{debug, info, warn};

use super::server::AppState;

/// Login endpoint (public).
pub const LOGIN_PATH: &str = "/authn/login";
/// Logout endpoint.
pub const LOGOUT_PATH: &str = "/authn/logout";
/// Token refresh endpoint.
pub const REFRESH_PATH: &str = "/authn/refresh";

/// Reply to requests that carry no valid session.
pub const NO_AUTH_SESSION: &str = "no auth session";

/// Authenticated identity attached to every protected request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSession {
    /// Authenticated client.
    pub client_id: String,
    /// Session the token belongs to.
    pub session_id: String,
    /// The bearer token presented.
    pub token: String,
}

impl ClientSession {
    fn new(info: SessionInfo, token: String) -> Self {
        Self {
            client_id: info.client_id,
            session_id: info.session_id,
            token,
        }
    }
}

/// Bearer token from the `Authorization` header, else the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Resolve a token into a [`ClientSession`].
pub fn authenticate(state: &AppState, token: &str) -> Option<ClientSession> {
    match state.authenticator.validate_token(token) {
        Ok(info) => Some(ClientSession::new(info, token.to_string())),
        Err(e) => {
            debug!(error = %e, "token rejected");
            None
        }
    }
}

/// Middleware guarding protected routes.
///
/// Rejects with `401 no auth session`; on success the identity is available
/// to handlers as `Extension<ClientSession>`.
pub async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = extract_token(req.headers()).and_then(|token| authenticate(&state, &token));
    match session {
        Some(session) => {
            let _ = req.extensions_mut().insert(session);
            next.run(req).await
        }
        None => {
            warn!(path = %req.uri().path(), "request without valid session");
            (StatusCode::UNAUTHORIZED, NO_AUTH_SESSION).into_response()
        }
    }
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginArgs {
    /// Client ID.
    pub login: String,
    /// Password.
    pub password: String,
}

/// POST /authn/login
pub async fn login_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let args: LoginArgs = match serde_json::from_slice(&body) {
        Ok(args) => args,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid login request: {e}")).into_response(),
    };
    match state.authenticator.login(&args.login, &args.password) {
        Ok(token) => {
            let cookie = format!(
                "{SESSION_COOKIE}={}; Path=/; HttpOnly; Secure; SameSite=Lax",
                token.token
            );
            let mut resp = Json(token).into_response();
            if let Ok(v) = HeaderValue::from_str(&cookie) {
                let _ = resp.headers_mut().insert(header::SET_COOKIE, v);
            }
            resp
        }
        Err(e) => {
            warn!(client_id = %args.login, error = %e, "login failed");
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

/// POST /authn/logout
///
/// Revokes the client's sessions and closes all of its connections.
pub async fn logout_handler(
    State(state): State<AppState>,
    axum::Extension(session): axum::Extension<ClientSession>,
) -> Response {
    state.authenticator.logout(&session.client_id);
    let closed = state.cm.close_all_client_connections(&session.client_id);
    info!(client_id = %session.client_id, closed, "logout");
    let mut resp = StatusCode::OK.into_response();
    let expired = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0");
    if let Ok(v) = HeaderValue::from_str(&expired) {
        let _ = resp.headers_mut().insert(header::SET_COOKIE, v);
    }
    resp
}

/// POST /authn/refresh
///
/// The body may carry the old token as a JSON string; otherwise the token
/// that authenticated this request is refreshed.
pub async fn refresh_handler(
    State(state): State<AppState>,
    axum::Extension(session): axum::Extension<ClientSession>,
    body: Bytes,
) -> Response {
    let old_token = if body.is_empty() {
        session.token.clone()
    } else {
        match serde_json::from_slice::<String>(&body) {
            Ok(token) => token,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid refresh request: {e}")).into_response(),
        }
    };
    match state.authenticator.refresh_token(&session.client_id, &old_token) {
        Ok(token) => Json(token).into_response(),
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "token refresh failed");
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (name, value) in pairs {
            let _ = h.append(*name, HeaderValue::from_str(value).unwrap());
        }
        h
    }

    #[test]
    fn bearer_token_wins() {
        let h = headers(&[("authorization", "Bearer abc"), ("cookie", "session=xyz")]);
        assert_eq!(extract_token(&h).as_deref(), Some("abc"));
    }

    #[test]
    fn cookie_fallback() {
        let h = headers(&[("cookie", "theme=dark; session=xyz; lang=en")]);
        assert_eq!(extract_token(&h).as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_or_empty_token() {
        assert!(extract_token(&HeaderMap::new()).is_none());
        assert!(extract_token(&headers(&[("authorization", "Bearer ")])).is_none());
        assert!(extract_token(&headers(&[("authorization", "Basic Zm9v")])).is_none());
        assert!(extract_token(&headers(&[("cookie", "session=")])).is_none());
    }
}
