//! Hub message router: consumers on one side, agents on the other.
//!
//! Requests addressed to a Thing are forwarded to the agent that owns it
//! under a hub-issued correlation ID, so consumers choosing the same ID never
//! collide; replies travel back under the consumer's own ID. Agents announce their Things with
//! `updatetd` notifications; the hub learns ownership from them and answers
//! `readtd` from the last TD it saw.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use thinghub_core::{
    NotificationMessage, Operation, RequestMessage, ResponseMessage, new_correlation_id,
};
use tracing::{debug, info, instrument, warn};

use crate::connection::{ServerConnection, rpc};
use crate::handler::MessageHandler;
use crate::manager::ConnectionManager;

/// A forwarded request waiting for the agent's answer.
struct PendingRequest {
    consumer: Arc<dyn ServerConnection>,
    /// Correlation ID the consumer used.
    correlation_id: String,
}

/// Routes messages between consumers and agents.
pub struct HubRouter {
    cm: Arc<ConnectionManager>,
    /// thingID → agent client ID
    directory: DashMap<String, String>,
    /// thingID → last published TD
    tds: DashMap<String, Value>,
    /// hub correlationID → consumer waiting on a forwarded request
    pending: Arc<DashMap<String, PendingRequest>>,
    rpc_timeout: Duration,
}

impl HubRouter {
    /// Create a router over the shared connection registry.
    pub fn new(cm: Arc<ConnectionManager>, rpc_timeout: Duration) -> Self {
        Self {
            cm,
            directory: DashMap::new(),
            tds: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            rpc_timeout,
        }
    }

    /// Record that `agent_id` serves `thing_id`.
    pub fn register_thing(&self, thing_id: impl Into<String>, agent_id: impl Into<String>) {
        let thing_id = thing_id.into();
        let agent_id = agent_id.into();
        if let Some(previous) = self.directory.insert(thing_id.clone(), agent_id.clone()) {
            if previous != agent_id {
                warn!(thing_id = %thing_id, previous = %previous, agent_id = %agent_id, "thing changed owner");
            }
        }
    }

    /// Agent serving `thing_id`, if known.
    pub fn agent_for(&self, thing_id: &str) -> Option<String> {
        self.directory.get(thing_id).map(|e| e.value().clone())
    }

    /// Forget every Thing served by `agent_id`. Returns how many were removed.
    pub fn unregister_agent(&self, agent_id: &str) -> usize {
        let before = self.directory.len();
        self.directory.retain(|thing_id, owner| {
            let keep = owner.as_str() != agent_id;
            if !keep {
                let _ = self.tds.remove(thing_id);
            }
            keep
        });
        before - self.directory.len()
    }

    /// Number of requests forwarded and not yet answered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn read_td(&self, req: &RequestMessage) -> ResponseMessage {
        match self.tds.get(&req.thing_id) {
            Some(td) => req.create_response(Some(td.value().clone()), None),
            None => req.create_response(None, Some(format!("unknown thing '{}'", req.thing_id))),
        }
    }
}

#[async_trait]
impl MessageHandler for HubRouter {
    #[instrument(skip_all, fields(op = %req.operation, thing_id = %req.thing_id, correlation_id = %req.correlation_id))]
    async fn handle_request(
        &self,
        mut req: RequestMessage,
        reply_to: Arc<dyn ServerConnection>,
    ) -> Option<ResponseMessage> {
        match req.operation {
            Operation::Unknown => {
                return Some(req.create_response(None, Some("unknown operation".into())));
            }
            op if op.is_notification() => {
                return Some(req.create_response(
                    None,
                    Some(format!("'{op}' is a notification, not a request")),
                ));
            }
            Operation::ReadTd => return Some(self.read_td(&req)),
            _ => {}
        }

        let Some(agent_id) = self.agent_for(&req.thing_id) else {
            return Some(req.create_response(None, Some(format!("unknown thing '{}'", req.thing_id))));
        };
        let Some(agent) = self.cm.get_connection_by_client_id(&agent_id) else {
            return Some(req.create_response(None, Some(format!("agent '{agent_id}' is not reachable"))));
        };

        if req.correlation_id.is_empty() {
            req.correlation_id = new_correlation_id();
        }
        let hub_id = new_correlation_id();
        match self.pending.entry(hub_id.clone()) {
            Entry::Occupied(_) => {
                return Some(req.create_response(
                    None,
                    Some(format!("duplicate correlation ID '{hub_id}'")),
                ));
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(PendingRequest {
                    consumer: reply_to.clone(),
                    correlation_id: req.correlation_id.clone(),
                });
            }
        }
        let consumer_id = std::mem::replace(&mut req.correlation_id, hub_id.clone());
        debug!(agent_id = %agent_id, hub_correlation_id = %hub_id, "forwarding request to agent");

        let pending = self.pending.clone();
        let timeout = self.rpc_timeout;
        drop(tokio::spawn(async move {
            let mut resp = rpc(agent.as_ref(), req, timeout).await.with_sender(agent_id);
            let _ = pending.remove(&hub_id);
            resp.correlation_id = consumer_id;
            if let Err(e) = reply_to.send_response(resp).await {
                debug!(hub_correlation_id = %hub_id, error = %e, "reply to consumer not delivered");
            }
        }));
        None
    }

    async fn handle_response(&self, resp: ResponseMessage, from: Arc<dyn ServerConnection>) {
        if resp.is_terminal() {
            debug!(
                correlation_id = %resp.correlation_id,
                from = from.client_id(),
                "late or unmatched response dropped"
            );
            return;
        }
        let waiting = self
            .pending
            .get(&resp.correlation_id)
            .map(|e| (e.consumer.clone(), e.correlation_id.clone()));
        match waiting {
            Some((consumer, correlation_id)) => {
                let mut resp = resp.with_sender(from.client_id());
                resp.correlation_id = correlation_id;
                if let Err(e) = consumer.send_response(resp).await {
                    debug!(error = %e, "progress update not delivered");
                }
            }
            None => debug!(
                correlation_id = %resp.correlation_id,
                status = resp.status.as_str(),
                "progress for unknown request dropped"
            ),
        }
    }

    async fn handle_notification(&self, notif: NotificationMessage, from: Arc<dyn ServerConnection>) {
        let notif = notif.with_sender(from.client_id());
        if notif.operation == Operation::UpdateTd {
            if notif.thing_id.is_empty() {
                warn!(agent_id = from.client_id(), "td update without thing ID");
                return;
            }
            self.register_thing(notif.thing_id.clone(), from.client_id());
            if let Some(td) = &notif.data {
                let _ = self.tds.insert(notif.thing_id.clone(), td.clone());
            }
            info!(thing_id = %notif.thing_id, agent_id = from.client_id(), "thing registered");
        }
        self.cm.publish_notification(&notif).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
