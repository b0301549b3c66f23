//! Advertising the hub's connect URLs.
//!
//! The record is protocol-neutral; an mDNS responder would map it onto a
//! DNS-SD service with TXT entries. [`LogPublisher`] stands in where no
//! responder is wired up.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thinghub_core::{ProtocolType, Result};
use tracing::info;

/// DNS-SD service type for WoT directories.
pub const WOT_SERVICE_TYPE: &str = "_wot._tcp";

/// What the hub advertises.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    /// Service instance name.
    pub instance_name: String,
    /// DNS-SD service type.
    pub service_type: String,
    /// Advertised host.
    pub host: String,
    /// HTTPS port.
    pub port: u16,
    /// Connect URL per enabled protocol.
    pub endpoints: BTreeMap<ProtocolType, String>,
    /// Protocol clients should prefer.
    pub preferred: ProtocolType,
}

impl DiscoveryRecord {
    /// TXT key/value pairs: one per endpoint plus the preferred protocol.
    pub fn txt_records(&self) -> Vec<(String, String)> {
        let mut txt: Vec<(String, String)> = self
            .endpoints
            .iter()
            .map(|(protocol, url)| (protocol.as_str().to_string(), url.clone()))
            .collect();
        txt.push(("preferred".to_string(), self.preferred.as_str().to_string()));
        txt
    }
}

/// Publishes a [`DiscoveryRecord`] on some discovery medium.
pub trait DiscoveryPublisher: Send + Sync {
    /// Start advertising `record`, replacing any earlier one.
    fn publish(&self, record: &DiscoveryRecord) -> Result<()>;

    /// Stop advertising.
    fn unpublish(&self);
}

/// Publisher that logs the record and keeps it for inspection.
#[derive(Default)]
pub struct LogPublisher {
    current: Mutex<Option<DiscoveryRecord>>,
}

impl LogPublisher {
    /// Create a publisher with nothing published.
    pub fn new() -> Self {
        Self::default()
    }

    /// The record currently advertised.
    pub fn current(&self) -> Option<DiscoveryRecord> {
        self.current.lock().clone()
    }
}

impl DiscoveryPublisher for LogPublisher {
    fn publish(&self, record: &DiscoveryRecord) -> Result<()> {
        info!(
            instance = %record.instance_name,
            service_type = %record.service_type,
            host = %record.host,
            port = record.port,
            preferred = %record.preferred,
            endpoints = ?record.endpoints,
            "discovery record published"
        );
        *self.current.lock() = Some(record.clone());
        Ok(())
    }

    fn unpublish(&self) {
        if let Some(record) = self.current.lock().take() {
            info!(instance = %record.instance_name, "discovery record withdrawn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DiscoveryRecord {
        let mut endpoints = BTreeMap::new();
        let _ = endpoints.insert(ProtocolType::Https, "https://hub:8444".to_string());
        let _ = endpoints.insert(ProtocolType::Wss, "wss://hub:8444/wss".to_string());
        DiscoveryRecord {
            instance_name: "thinghub".into(),
            service_type: WOT_SERVICE_TYPE.into(),
            host: "hub".into(),
            port: 8444,
            endpoints,
            preferred: ProtocolType::Wss,
        }
    }

    #[test]
    fn txt_records_list_endpoints_and_preference() {
        let txt = record().txt_records();
        assert!(txt.contains(&("wss".to_string(), "wss://hub:8444/wss".to_string())));
        assert!(txt.contains(&("https".to_string(), "https://hub:8444".to_string())));
        assert_eq!(txt.last().unwrap(), &("preferred".to_string(), "wss".to_string()));
    }

    #[test]
    fn log_publisher_tracks_current_record() {
        let publisher = LogPublisher::new();
        assert!(publisher.current().is_none());
        publisher.publish(&record()).unwrap();
        assert_eq!(publisher.current().unwrap().port, 8444);
        publisher.unpublish();
        assert!(publisher.current().is_none());
    }

    #[test]
    fn record_serialises_camel_case() {
        let v = serde_json::to_value(record()).unwrap();
        assert_eq!(v["instanceName"], "thinghub");
        assert_eq!(v["serviceType"], "_wot._tcp");
        assert_eq!(v["endpoints"]["wss"], "wss://hub:8444/wss");
    }
}
