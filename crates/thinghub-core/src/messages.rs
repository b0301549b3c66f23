//! Message envelopes exchanged between consumers, the hub, and agents.
//!
//! All three envelopes share the JSON field names used on the wire
//! (`thingID`, `correlationID`, `senderID`, ...). Missing fields decode to
//! their defaults so that thin clients can omit what they do not use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operations::Operation;

/// Generate a fresh correlation ID.
pub fn new_correlation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current UTC time as an RFC 3339 timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Progress of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Received by the hub, not yet delivered to the agent.
    Pending,
    /// The agent is working on the request.
    Running,
    /// Terminal: `output` is present and `error` is empty.
    #[default]
    Completed,
    /// Terminal: `error` is present.
    Failed,
}

impl ResponseStatus {
    /// Whether no further responses follow this one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A request to perform an operation on a Thing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// What to do.
    pub operation: Operation,
    /// Target Thing.
    #[serde(rename = "thingID", default, skip_serializing_if = "String::is_empty")]
    pub thing_id: String,
    /// Affordance name within the Thing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Operation input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Links the eventual response to this request.
    #[serde(rename = "correlationID", default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    /// Authenticated sender. Always overwritten by the server on receipt.
    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl RequestMessage {
    /// Create a request with a fresh correlation ID.
    pub fn new(
        operation: Operation,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        input: Option<Value>,
    ) -> Self {
        Self {
            operation,
            thing_id: thing_id.into(),
            name: name.into(),
            input,
            correlation_id: new_correlation_id(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
        }
    }

    /// Replace the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Replace the sender ID.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// Build the terminal response to this request.
    ///
    /// The response is `failed` when `error` is given, `completed` otherwise.
    pub fn create_response(&self, output: Option<Value>, error: Option<String>) -> ResponseMessage {
        let status = if error.is_some() {
            ResponseStatus::Failed
        } else {
            ResponseStatus::Completed
        };
        ResponseMessage {
            operation: Some(self.operation),
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            output: if error.is_some() { None } else { output },
            error: error.unwrap_or_default(),
            status,
            correlation_id: self.correlation_id.clone(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
        }
    }

    /// Build a non-terminal status update for this request.
    pub fn create_progress(&self, status: ResponseStatus) -> ResponseMessage {
        let mut resp = self.create_response(None, None);
        resp.status = status;
        resp
    }
}

/// The reply to a [`RequestMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Operation of the originating request, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Thing the request addressed.
    #[serde(rename = "thingID", default, skip_serializing_if = "String::is_empty")]
    pub thing_id: String,
    /// Affordance name the request addressed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Result of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error description, empty unless `status` is `failed`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Progress of the request. Absent on the wire means `completed`.
    #[serde(default)]
    pub status: ResponseStatus,
    /// Correlation ID of the originating request.
    #[serde(rename = "correlationID", default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    /// Authenticated sender of the response.
    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl ResponseMessage {
    /// A completed response carrying `output`.
    pub fn completed(correlation_id: impl Into<String>, output: Option<Value>) -> Self {
        Self {
            operation: None,
            thing_id: String::new(),
            name: String::new(),
            output,
            error: String::new(),
            status: ResponseStatus::Completed,
            correlation_id: correlation_id.into(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
        }
    }

    /// A failed response carrying `error`.
    pub fn failed(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            operation: None,
            thing_id: String::new(),
            name: String::new(),
            output: None,
            error: error.into(),
            status: ResponseStatus::Failed,
            correlation_id: correlation_id.into(),
            sender_id: String::new(),
            timestamp: now_timestamp(),
        }
    }

    /// Replace the sender ID.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// Whether this response ends the request.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// An unsolicited message from an agent: event, property update, or TD update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Notification kind.
    pub operation: Operation,
    /// Thing that emitted the notification.
    #[serde(rename = "thingID", default, skip_serializing_if = "String::is_empty")]
    pub thing_id: String,
    /// Event or property name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Notification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Agent that emitted the notification.
    #[serde(rename = "senderID", default, skip_serializing_if = "String::is_empty")]
    pub sender_id: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl NotificationMessage {
    /// Create a notification stamped with the current time.
    pub fn new(
        operation: Operation,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            operation,
            thing_id: thing_id.into(),
            name: name.into(),
            data,
            sender_id: String::new(),
            timestamp: now_timestamp(),
        }
    }

    /// Replace the sender ID.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }
}

/// A framed envelope, discriminated by a top-level `messageType` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum WireMessage {
    /// A request frame.
    Request(RequestMessage),
    /// A response frame.
    Response(ResponseMessage),
    /// A notification frame.
    Notification(NotificationMessage),
}

impl WireMessage {
    /// Value of the `messageType` discriminator.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Notification(_) => "notification",
        }
    }

    /// Decode a frame from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode a frame as JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<RequestMessage> for WireMessage {
    fn from(req: RequestMessage) -> Self {
        Self::Request(req)
    }
}

impl From<ResponseMessage> for WireMessage {
    fn from(resp: ResponseMessage) -> Self {
        Self::Response(resp)
    }
}

impl From<NotificationMessage> for WireMessage {
    fn from(notif: NotificationMessage) -> Self {
        Self::Notification(notif)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── RequestMessage ──────────────────────────────────────────────

    #[test]
    fn request_uses_wire_field_names() {
        let req = RequestMessage::new(Operation::InvokeAction, "lamp", "toggle", Some(json!(true)))
            .with_correlation_id("c7")
            .with_sender("alice");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["operation"], "invokeaction");
        assert_eq!(v["thingID"], "lamp");
        assert_eq!(v["name"], "toggle");
        assert_eq!(v["input"], true);
        assert_eq!(v["correlationID"], "c7");
        assert_eq!(v["senderID"], "alice");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn request_minimal_json_decodes() {
        let req: RequestMessage = serde_json::from_str(r#"{"operation":"readproperty"}"#).unwrap();
        assert_eq!(req.operation, Operation::ReadProperty);
        assert!(req.thing_id.is_empty());
        assert!(req.input.is_none());
        assert!(req.correlation_id.is_empty());
    }

    #[test]
    fn request_without_operation_is_rejected() {
        let res = serde_json::from_str::<RequestMessage>(r#"{"thingID":"t1"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn new_requests_get_distinct_correlation_ids() {
        let a = RequestMessage::new(Operation::Ping, "", "", None);
        let b = RequestMessage::new(Operation::Ping, "", "", None);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn create_response_completed() {
        let req = RequestMessage::new(Operation::ReadProperty, "t1", "temp", None)
            .with_correlation_id("r1");
        let resp = req.create_response(Some(json!(21.5)), None);
        assert_eq!(resp.status, ResponseStatus::Completed);
        assert_eq!(resp.correlation_id, "r1");
        assert_eq!(resp.thing_id, "t1");
        assert_eq!(resp.name, "temp");
        assert_eq!(resp.output, Some(json!(21.5)));
        assert!(resp.error.is_empty());
    }

    #[test]
    fn create_response_failed_drops_output() {
        let req = RequestMessage::new(Operation::ReadProperty, "t1", "temp", None);
        let resp = req.create_response(Some(json!(1)), Some("no such property".into()));
        assert_eq!(resp.status, ResponseStatus::Failed);
        assert_eq!(resp.error, "no such property");
        assert!(resp.output.is_none());
    }

    #[test]
    fn create_progress_is_not_terminal() {
        let req = RequestMessage::new(Operation::InvokeAction, "t1", "a", None);
        let resp = req.create_progress(ResponseStatus::Running);
        assert_eq!(resp.status, ResponseStatus::Running);
        assert!(!resp.is_terminal());
    }

    // ── ResponseMessage ─────────────────────────────────────────────

    #[test]
    fn response_missing_status_means_completed() {
        let resp: ResponseMessage =
            serde_json::from_str(r#"{"correlationID":"c1","output":"on"}"#).unwrap();
        assert_eq!(resp.status, ResponseStatus::Completed);
        assert!(resp.is_terminal());
    }

    #[test]
    fn failed_response_serializes_error() {
        let resp = ResponseMessage::failed("c2", "connection lost");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "connection lost");
        assert!(v.get("output").is_none());
    }

    #[test]
    fn completed_response_omits_error() {
        let resp = ResponseMessage::completed("c3", Some(json!({"a": 1})));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "completed");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn status_terminality() {
        assert!(!ResponseStatus::Pending.is_terminal());
        assert!(!ResponseStatus::Running.is_terminal());
        assert!(ResponseStatus::Completed.is_terminal());
        assert!(ResponseStatus::Failed.is_terminal());
    }

    // ── NotificationMessage ─────────────────────────────────────────

    #[test]
    fn notification_has_no_correlation_id() {
        let notif = NotificationMessage::new(Operation::Event, "thing1", "event1", Some(json!("hello")));
        let v = serde_json::to_value(&notif).unwrap();
        assert_eq!(v["operation"], "event");
        assert_eq!(v["thingID"], "thing1");
        assert_eq!(v["name"], "event1");
        assert_eq!(v["data"], "hello");
        assert!(v.get("correlationID").is_none());
    }

    // ── WireMessage ─────────────────────────────────────────────────

    #[test]
    fn wire_request_is_flat_with_message_type() {
        let text = r#"{"messageType":"request","operation":"invokeaction","thingID":"lamp","name":"toggle","correlationID":"c7"}"#;
        let msg = WireMessage::from_json(text).unwrap();
        assert_matches!(&msg, WireMessage::Request(req) if req.correlation_id == "c7" && req.thing_id == "lamp");
        assert_eq!(msg.message_type(), "request");
    }

    #[test]
    fn wire_response_decodes() {
        let text = r#"{"messageType":"response","correlationID":"c7","status":"completed","output":"on"}"#;
        let msg = WireMessage::from_json(text).unwrap();
        assert_matches!(msg, WireMessage::Response(resp) if resp.output == Some(json!("on")));
    }

    #[test]
    fn wire_encoding_places_fields_at_top_level() {
        let notif = NotificationMessage::new(Operation::UpdateProperty, "t1", "p1", Some(json!(3)));
        let text = WireMessage::from(notif).to_json().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["messageType"], "notification");
        assert_eq!(v["operation"], "updateproperty");
        assert_eq!(v["data"], 3);
    }

    #[test]
    fn wire_unknown_message_type_is_rejected() {
        assert!(WireMessage::from_json(r#"{"messageType":"bogus"}"#).is_err());
        assert!(WireMessage::from_json("not json").is_err());
    }
}
