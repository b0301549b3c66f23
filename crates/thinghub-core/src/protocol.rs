//! Protocol identifiers and HTTP header names shared by all servers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Header carrying the request/response correlation ID.
pub const HEADER_CORRELATION_ID: &str = "correlationID";
/// Header carrying the client-chosen connection ID.
pub const HEADER_CONNECTION_ID: &str = "connectionID";
/// Header carrying the response status on HTTP replies.
pub const HEADER_STATUS: &str = "status";
/// Cookie holding the session token in browser flows.
pub const SESSION_COOKIE: &str = "session";

/// Wire protocol a connection was established over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Plain HTTPS request/response.
    Https,
    /// HTTPS with an SSE return channel.
    #[serde(rename = "ssesc")]
    SseSc,
    /// WebSocket over HTTPS.
    Wss,
    /// MQTT over TLS.
    Mqtts,
}

impl ProtocolType {
    /// Wire name of the protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::SseSc => "ssesc",
            Self::Wss => "wss",
            Self::Mqtts => "mqtts",
        }
    }

    /// URL scheme used in connect URLs for this protocol.
    pub fn scheme(self, tls: bool) -> &'static str {
        match (self, tls) {
            (Self::Https | Self::SseSc, true) => "https",
            (Self::Https | Self::SseSc, false) => "http",
            (Self::Wss, true) => "wss",
            (Self::Wss, false) => "ws",
            (Self::Mqtts, true) => "mqtts",
            (Self::Mqtts, false) => "mqtt",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "https" => Ok(Self::Https),
            "ssesc" => Ok(Self::SseSc),
            "wss" => Ok(Self::Wss),
            "mqtts" => Ok(Self::Mqtts),
            other => Err(format!("unknown protocol type '{other}'")),
        }
    }
}
