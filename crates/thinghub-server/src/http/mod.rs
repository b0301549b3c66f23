//! HTTPS server base shared by all HTTP-hosted subprotocols.

pub mod auth;
pub mod forms;
pub mod handlers;
pub mod server;
pub mod tls;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use thinghub_core::protocol::{HEADER_CORRELATION_ID, HEADER_STATUS};
use thinghub_core::{ResponseMessage, ResponseStatus, TransportError};

pub use auth::ClientSession;
pub use forms::{Form, OpBinding};
pub use server::{AppState, HttpServer, ServerHandle};

/// Transport error rendered as a plain-text HTTP reply.
#[derive(Debug)]
pub struct HttpError(pub TransportError);

impl From<TransportError> for HttpError {
    fn from(e: TransportError) -> Self {
        Self(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.0.to_string()).into_response()
    }
}

fn header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

/// Write a response envelope as an HTTP reply.
///
/// A failed response becomes `500` with the error text; anything else is
/// `200` with the JSON output. The status travels in a header; the
/// correlation ID is echoed only when `request` carried one.
pub fn write_reply(request: &HeaderMap, resp: ResponseMessage) -> Response {
    let mut headers = HeaderMap::new();
    if header_str(request, HEADER_CORRELATION_ID).is_some() {
        if let Some(v) = header_value(&resp.correlation_id) {
            // header names are case-insensitive; `correlationID` on the wire
            let _ = headers.insert(HeaderName::from_static("correlationid"), v);
        }
    }
    if let Some(v) = header_value(resp.status.as_str()) {
        let _ = headers.insert(HeaderName::from_static(HEADER_STATUS), v);
    }
    if resp.status == ResponseStatus::Failed {
        return (StatusCode::INTERNAL_SERVER_ERROR, headers, resp.error).into_response();
    }
    let output = resp.output.unwrap_or(serde_json::Value::Null);
    (StatusCode::OK, headers, Json(output)).into_response()
}

/// Read a header as a non-empty string.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
