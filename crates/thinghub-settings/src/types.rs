//! Protocol server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default HTTPS port of the hub.
pub const DEFAULT_HTTPS_PORT: u16 = 8444;
/// Default MQTT-over-TLS port.
pub const DEFAULT_MQTT_TCP_PORT: u16 = 8883;
/// Default MQTT-over-WSS port.
pub const DEFAULT_MQTT_WSS_PORT: u16 = 8884;
/// Default SSE-SC path.
pub const DEFAULT_SSESC_PATH: &str = "/ssesc";
/// Default WebSocket path.
pub const DEFAULT_WSS_PATH: &str = "/wss";

/// Which protocol servers to run and how.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolsConfig {
    /// Bind address of the HTTPS server.
    pub http_host: String,
    /// HTTPS port (`0` = auto-assign).
    pub https_port: u16,
    /// Serve the login, logout, and refresh endpoints.
    pub enable_auth_endpoints: bool,
    /// Serve the SSE-SC subprotocol.
    pub enable_ssesc: bool,
    /// Serve the WebSocket subprotocol.
    pub enable_wss: bool,
    /// Serve MQTT (not implemented; enabling it fails startup).
    pub enable_mqtt: bool,
    /// Bind address of the MQTT server.
    pub mqtt_host: String,
    /// MQTT-over-TLS port.
    pub mqtt_tcp_port: u16,
    /// MQTT-over-WSS port.
    pub mqtt_wss_port: u16,
    /// Path of the SSE-SC endpoint.
    pub ssesc_path: String,
    /// Path of the WebSocket endpoint.
    pub wss_path: String,
    /// PEM file with the server certificate chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_cert_path: Option<PathBuf>,
    /// PEM file with the server private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key_path: Option<PathBuf>,
    /// PEM file with the CA certificate clients validate against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<PathBuf>,
    /// Maximum time a single outbound frame may wait for queue space.
    pub write_timeout_ms: u64,
    /// Deadline for server-initiated requests.
    pub rpc_timeout_ms: u64,
    /// Outbound frame queue depth per connection.
    pub send_queue_size: usize,
    /// Maximum accepted WebSocket frame or HTTP body size in bytes.
    pub max_message_size: usize,
    /// Interval between keepalive pings on long-lived connections.
    pub ping_interval_secs: u64,
    /// Instance name published by discovery.
    pub instance_name: String,
    /// Publish connect URLs through the discovery adapter.
    pub enable_discovery: bool,
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            https_port: DEFAULT_HTTPS_PORT,
            enable_auth_endpoints: true,
            enable_ssesc: true,
            enable_wss: true,
            enable_mqtt: false,
            mqtt_host: "0.0.0.0".to_string(),
            mqtt_tcp_port: DEFAULT_MQTT_TCP_PORT,
            mqtt_wss_port: DEFAULT_MQTT_WSS_PORT,
            ssesc_path: DEFAULT_SSESC_PATH.to_string(),
            wss_path: DEFAULT_WSS_PATH.to_string(),
            server_cert_path: None,
            server_key_path: None,
            ca_cert_path: None,
            write_timeout_ms: 30_000,
            rpc_timeout_ms: 30_000,
            send_queue_size: 64,
            max_message_size: 1024 * 1024, // 1 MB
            ping_interval_secs: 20,
            instance_name: "thinghub".to_string(),
            enable_discovery: false,
        }
    }
}

impl ProtocolsConfig {
    /// Per-connection write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// RPC waiter deadline.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Keepalive interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Whether the HTTPS listener terminates TLS.
    pub fn tls_enabled(&self) -> bool {
        self.server_cert_path.is_some() && self.server_key_path.is_some()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match (&self.server_cert_path, &self.server_key_path) {
            (Some(_), None) => {
                return Err(SettingsError::InvalidValue(
                    "serverKeyPath is required when serverCertPath is set".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(SettingsError::InvalidValue(
                    "serverCertPath is required when serverKeyPath is set".into(),
                ));
            }
            _ => {}
        }
        for (field, path) in [("ssescPath", &self.ssesc_path), ("wssPath", &self.wss_path)] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(SettingsError::InvalidValue(format!(
                    "{field} must be an absolute path, got '{path}'"
                )));
            }
        }
        if self.enable_ssesc && self.enable_wss && self.ssesc_path == self.wss_path {
            return Err(SettingsError::InvalidValue(
                "ssescPath and wssPath must differ".into(),
            ));
        }
        if self.write_timeout_ms == 0 || self.rpc_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.send_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueSize must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
