//! `TransportManager`: owns the protocol servers and exposes them as one.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use thinghub_auth::Authenticator;
use thinghub_core::{NotificationMessage, Operation, ProtocolType, Result, TransportError};
use thinghub_settings::ProtocolsConfig;
use tokio_rustls::rustls::ServerConfig;
use tracing::{info, warn};

use crate::discovery::{DiscoveryPublisher, DiscoveryRecord, LogPublisher, WOT_SERVICE_TYPE};
use crate::handler::MessageHandler;
use crate::http::forms::{Form, add_td_forms};
use crate::http::server::serve;
use crate::http::tls::load_tls_config;
use crate::http::{AppState, HttpServer};
use crate::manager::ConnectionManager;
use crate::shutdown::ShutdownCoordinator;
use crate::{ssesc, wss};

/// Time `stop` gives the listener to drain.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregates the enabled protocol servers behind one registry and handler.
pub struct TransportManager {
    config: Arc<ProtocolsConfig>,
    server: HttpServer,
    router: Router,
    tls: Option<Arc<ServerConfig>>,
    cm: Arc<ConnectionManager>,
    shutdown: ShutdownCoordinator,
    local_addr: Mutex<Option<SocketAddr>>,
    discovery: Mutex<Option<Arc<dyn DiscoveryPublisher>>>,
}

impl TransportManager {
    /// Build the servers with a fresh connection registry. Nothing is bound yet.
    pub fn new(
        config: ProtocolsConfig,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        Self::with_connection_manager(config, authenticator, handler, Arc::new(ConnectionManager::new()))
    }

    /// Build the servers around an existing registry, for handlers that need
    /// the registry themselves.
    pub fn with_connection_manager(
        config: ProtocolsConfig,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn MessageHandler>,
        cm: Arc<ConnectionManager>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        if config.enable_mqtt {
            return Err(TransportError::NotImplemented("mqtt transport".into()));
        }
        let tls = match (&config.server_cert_path, &config.server_key_path) {
            (Some(cert), Some(key)) => Some(load_tls_config(cert, key)?),
            _ => None,
        };

        let config = Arc::new(config);
        let state = AppState {
            config: config.clone(),
            authenticator,
            cm: cm.clone(),
            handler,
        };
        let mut server = HttpServer::new(state);
        let mut protected: Router<AppState> = Router::new();
        let mut public: Router<AppState> = Router::new();
        if config.enable_ssesc {
            ssesc::register_ops(&mut server, &config.ssesc_path);
            protected = protected.merge(ssesc::routes(&config.ssesc_path));
        }
        if config.enable_wss {
            wss::register_ops(&mut server, &config.wss_path);
            public = public.merge(wss::routes(&config.wss_path));
        }
        let router = server.router(protected, public);

        Ok(Self {
            config,
            server,
            router,
            tls,
            cm,
            shutdown: ShutdownCoordinator::new(),
            local_addr: Mutex::new(None),
            discovery: Mutex::new(None),
        })
    }

    /// Build and start listening.
    pub async fn start(
        config: ProtocolsConfig,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        let tm = Self::new(config, authenticator, handler)?;
        let _ = tm.listen().await?;
        Ok(tm)
    }

    /// Bind the configured address and serve until [`stop`](Self::stop).
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.local_addr.lock().is_some() {
            return Err(TransportError::Config("transport already listening".into()));
        }
        let handle = serve(
            &self.config,
            self.router.clone(),
            self.tls.clone(),
            self.shutdown.token(),
        )
        .await?;
        *self.local_addr.lock() = Some(handle.local_addr);
        self.shutdown.track(handle.task);

        info!(
            addr = %handle.local_addr,
            ssesc = self.config.enable_ssesc,
            wss = self.config.enable_wss,
            preferred = %self.preferred_protocol(),
            "transport started"
        );
        if self.config.enable_discovery {
            self.publish_discovery(Arc::new(LogPublisher::new()))?;
        }
        Ok(handle.local_addr)
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The complete router, for serving it on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Server configuration.
    pub fn config(&self) -> &ProtocolsConfig {
        &self.config
    }

    /// The shared connection registry.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.cm
    }

    fn advertised_host(&self) -> &str {
        match self.config.http_host.as_str() {
            "" | "0.0.0.0" | "::" | "[::]" => "localhost",
            host => host,
        }
    }

    fn port(&self) -> u16 {
        self.local_addr()
            .map_or(self.config.https_port, |addr| addr.port())
    }

    fn base_url(&self, protocol: ProtocolType) -> String {
        format!(
            "{}://{}:{}",
            protocol.scheme(self.config.tls_enabled()),
            self.advertised_host(),
            self.port()
        )
    }

    /// Connect URL for `protocol`, or `None` when it is not served.
    pub fn get_connect_url(&self, protocol: ProtocolType) -> Option<String> {
        match protocol {
            ProtocolType::Https => Some(self.base_url(protocol)),
            ProtocolType::SseSc if self.config.enable_ssesc => {
                Some(format!("{}{}", self.base_url(protocol), self.config.ssesc_path))
            }
            ProtocolType::Wss if self.config.enable_wss => {
                Some(format!("{}{}", self.base_url(protocol), self.config.wss_path))
            }
            _ => None,
        }
    }

    /// The protocol clients should use: WebSocket, then SSE-SC, then plain HTTPS.
    pub fn preferred_protocol(&self) -> ProtocolType {
        if self.config.enable_wss {
            ProtocolType::Wss
        } else if self.config.enable_ssesc {
            ProtocolType::SseSc
        } else {
            ProtocolType::Https
        }
    }

    /// Connect URL of every served protocol.
    pub fn endpoints(&self) -> BTreeMap<ProtocolType, String> {
        [ProtocolType::Https, ProtocolType::SseSc, ProtocolType::Wss, ProtocolType::Mqtts]
            .into_iter()
            .filter_map(|p| self.get_connect_url(p).map(|url| (p, url)))
            .collect()
    }

    /// Forms for `op` across all servers.
    pub fn forms(&self, op: Operation) -> Vec<Form> {
        self.server.forms(op, &self.base_url(ProtocolType::Https))
    }

    /// Append the forms of every server to a Thing Description.
    pub fn add_td_forms(&self, td: &mut Value) {
        add_td_forms(td, self.server.bindings(), &self.base_url(ProtocolType::Https));
    }

    /// Send a notification to every subscribed connection.
    pub async fn publish_notification(&self, notif: &NotificationMessage) {
        self.cm.publish_notification(notif).await;
    }

    /// Close every connection of `client_id`.
    pub fn close_all_client_connections(&self, client_id: &str) -> usize {
        self.cm.close_all_client_connections(client_id)
    }

    /// Close every connection.
    pub fn close_all(&self) -> usize {
        self.cm.close_all()
    }

    /// What discovery advertises for this hub.
    pub fn discovery_record(&self) -> DiscoveryRecord {
        DiscoveryRecord {
            instance_name: self.config.instance_name.clone(),
            service_type: WOT_SERVICE_TYPE.to_string(),
            host: self.advertised_host().to_string(),
            port: self.port(),
            endpoints: self.endpoints(),
            preferred: self.preferred_protocol(),
        }
    }

    /// Advertise the hub through `publisher`, withdrawing any earlier one.
    pub fn publish_discovery(&self, publisher: Arc<dyn DiscoveryPublisher>) -> Result<()> {
        publisher.publish(&self.discovery_record())?;
        if let Some(previous) = self.discovery.lock().replace(publisher) {
            previous.unpublish();
        }
        Ok(())
    }

    /// Close every connection, withdraw discovery, and stop the listener.
    pub async fn stop(&self) {
        let closed = self.close_all();
        if let Some(publisher) = self.discovery.lock().take() {
            publisher.unpublish();
        }
        if self.shutdown.is_shutting_down() {
            warn!("transport stop called twice");
        }
        self.shutdown.graceful_shutdown(Some(STOP_TIMEOUT)).await;
        info!(closed, "transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use thinghub_auth::{JwtAuthenticator, MemoryAuthnStore};

    use crate::hub::HubRouter;

    fn config() -> ProtocolsConfig {
        ProtocolsConfig {
            http_host: "127.0.0.1".into(),
            https_port: 0,
            ..ProtocolsConfig::default()
        }
    }

    fn build(config: ProtocolsConfig) -> Result<TransportManager> {
        let store = Arc::new(MemoryAuthnStore::new(Duration::from_secs(60)));
        let auth = Arc::new(JwtAuthenticator::new(store, b"test-secret"));
        let cm = Arc::new(ConnectionManager::new());
        let hub = Arc::new(HubRouter::new(cm.clone(), Duration::from_secs(1)));
        TransportManager::with_connection_manager(config, auth, hub, cm)
    }

    #[test]
    fn mqtt_is_not_implemented() {
        let result = build(ProtocolsConfig {
            enable_mqtt: true,
            ..config()
        });
        assert_matches!(result.err(), Some(TransportError::NotImplemented(_)));
    }

    #[test]
    fn half_tls_config_is_rejected() {
        let result = build(ProtocolsConfig {
            server_cert_path: Some("/tmp/cert.pem".into()),
            ..config()
        });
        assert_matches!(result.err(), Some(TransportError::Config(_)));
    }

    #[test]
    fn connect_urls_follow_enabled_protocols() {
        let tm = build(ProtocolsConfig {
            http_host: "0.0.0.0".into(),
            https_port: 9443,
            ..config()
        })
        .unwrap();
        assert_eq!(tm.get_connect_url(ProtocolType::Https).unwrap(), "http://localhost:9443");
        assert_eq!(tm.get_connect_url(ProtocolType::SseSc).unwrap(), "http://localhost:9443/ssesc");
        assert_eq!(tm.get_connect_url(ProtocolType::Wss).unwrap(), "ws://localhost:9443/wss");
        assert!(tm.get_connect_url(ProtocolType::Mqtts).is_none());
        assert_eq!(tm.endpoints().len(), 3);
    }

    #[test]
    fn preferred_protocol_falls_back() {
        let tm = build(config()).unwrap();
        assert_eq!(tm.preferred_protocol(), ProtocolType::Wss);

        let tm = build(ProtocolsConfig { enable_wss: false, ..config() }).unwrap();
        assert_eq!(tm.preferred_protocol(), ProtocolType::SseSc);
        assert!(tm.get_connect_url(ProtocolType::Wss).is_none());

        let tm = build(ProtocolsConfig {
            enable_wss: false,
            enable_ssesc: false,
            ..config()
        })
        .unwrap();
        assert_eq!(tm.preferred_protocol(), ProtocolType::Https);
        assert_eq!(tm.endpoints().len(), 1);
    }

    #[test]
    fn td_forms_include_every_server() {
        let tm = build(config()).unwrap();
        let mut td = json!({
            "id": "t1",
            "properties": {"temp": {}},
            "events": {"alarm": {}},
            "actions": {"blink": {}}
        });
        tm.add_td_forms(&mut td);
        let subprotocols: Vec<&str> = td["events"]["alarm"]["forms"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["subprotocol"].as_str())
            .collect();
        assert!(subprotocols.contains(&"ssesc"));
        assert!(subprotocols.contains(&"wss"));
        assert!(!td["actions"]["blink"]["forms"].as_array().unwrap().is_empty());
    }

    #[test]
    fn forms_for_invoke_action_point_at_things_path() {
        let tm = build(ProtocolsConfig { enable_wss: false, ..config() }).unwrap();
        let forms = tm.forms(Operation::InvokeAction);
        assert_eq!(forms.len(), 1);
        assert!(forms[0].href.contains("/things/"));
    }

    #[test]
    fn discovery_record_reflects_endpoints() {
        let tm = build(config()).unwrap();
        let publisher = Arc::new(LogPublisher::new());
        tm.publish_discovery(publisher.clone()).unwrap();
        let record = publisher.current().unwrap();
        assert_eq!(record.service_type, WOT_SERVICE_TYPE);
        assert_eq!(record.preferred, ProtocolType::Wss);
        assert_eq!(record.host, "127.0.0.1");
        assert!(record.endpoints.contains_key(&ProtocolType::SseSc));
    }

    #[tokio::test]
    async fn listen_then_stop() {
        let tm = build(config()).unwrap();
        let addr = tm.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(tm.local_addr(), Some(addr));
        assert_matches!(tm.listen().await, Err(TransportError::Config(_)));

        let publisher = Arc::new(LogPublisher::new());
        tm.publish_discovery(publisher.clone()).unwrap();
        assert_eq!(publisher.current().unwrap().port, addr.port());

        tm.stop().await;
        assert!(publisher.current().is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
