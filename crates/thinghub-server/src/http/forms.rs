//! WoT Forms describing how each operation is reached over this server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thinghub_core::Operation;
use tracing::debug;

/// A route registered for an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpBinding {
    /// Operation served by the route.
    pub op: Operation,
    /// HTTP method.
    pub method: String,
    /// Path template with `{thingID}` and `{name}` placeholders.
    pub path: String,
    /// Subprotocol the route belongs to, if not plain HTTP.
    pub subprotocol: Option<String>,
}

/// A WoT Thing Description form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Form {
    /// Operation this form performs.
    pub op: Operation,
    /// Absolute target URL.
    pub href: String,
    /// HTTP method.
    #[serde(rename = "htv:methodName")]
    pub method_name: String,
    /// Payload media type.
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// Subprotocol, for SSE-SC and WebSocket routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
}

impl OpBinding {
    /// Render the binding as a form rooted at `base_url`.
    pub fn to_form(&self, base_url: &str) -> Form {
        Form {
            op: self.op,
            href: format!("{}{}", base_url.trim_end_matches('/'), self.path),
            method_name: self.method.clone(),
            content_type: "application/json".to_string(),
            subprotocol: self.subprotocol.clone(),
        }
    }
}

/// Top-level and affordance operations a TD lists forms for.
fn affordance_ops(kind: &str) -> &'static [Operation] {
    match kind {
        "properties" => &[
            Operation::ReadProperty,
            Operation::WriteProperty,
            Operation::ObserveProperty,
            Operation::UnobserveProperty,
        ],
        "events" => &[Operation::SubscribeEvent, Operation::UnsubscribeEvent],
        "actions" => &[Operation::InvokeAction, Operation::QueryAction, Operation::CancelAction],
        _ => &[],
    }
}

/// Append forms for `bindings` to a Thing Description.
///
/// Thing-level operations go in the top-level `forms` array. Each property,
/// event, and action gets the forms of its own operations. Existing forms
/// are kept.
pub fn add_td_forms(td: &mut Value, bindings: &[OpBinding], base_url: &str) {
    let Some(obj) = td.as_object_mut() else {
        debug!("TD is not an object, forms not added");
        return;
    };

    let top: Vec<Value> = bindings
        .iter()
        .filter(|b| b.op.is_thing_level())
        .filter_map(|b| serde_json::to_value(b.to_form(base_url)).ok())
        .collect();
    append_forms(obj.entry("forms").or_insert_with(|| Value::Array(Vec::new())), top);

    for kind in ["properties", "events", "actions"] {
        let ops = affordance_ops(kind);
        let Some(affordances) = obj.get_mut(kind).and_then(Value::as_object_mut) else {
            continue;
        };
        for affordance in affordances.values_mut() {
            let Some(aff) = affordance.as_object_mut() else {
                continue;
            };
            let forms: Vec<Value> = bindings
                .iter()
                .filter(|b| ops.contains(&b.op))
                .filter_map(|b| serde_json::to_value(b.to_form(base_url)).ok())
                .collect();
            append_forms(aff.entry("forms").or_insert_with(|| Value::Array(Vec::new())), forms);
        }
    }
}

fn append_forms(slot: &mut Value, forms: Vec<Value>) {
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    if let Some(arr) = slot.as_array_mut() {
        arr.extend(forms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(op: Operation, path: &str) -> OpBinding {
        OpBinding {
            op,
            method: "POST".into(),
            path: path.into(),
            subprotocol: None,
        }
    }

    #[test]
    fn form_serialises_with_wot_keys() {
        let form = binding(Operation::InvokeAction, "/things/{thingID}/invokeaction/{name}")
            .to_form("https://hub:8444/");
        let v = serde_json::to_value(&form).unwrap();
        assert_eq!(v["op"], "invokeaction");
        assert_eq!(v["href"], "https://hub:8444/things/{thingID}/invokeaction/{name}");
        assert_eq!(v["htv:methodName"], "POST");
        assert_eq!(v["contentType"], "application/json");
        assert!(v.get("subprotocol").is_none());
    }

    #[test]
    fn forms_are_placed_by_affordance_kind() {
        let bindings = vec![
            binding(Operation::ReadAllProperties, "/things/{thingID}/readallproperties"),
            binding(Operation::ReadProperty, "/things/{thingID}/readproperty/{name}"),
            binding(Operation::InvokeAction, "/things/{thingID}/invokeaction/{name}"),
            binding(Operation::SubscribeEvent, "/ssesc/subscribe/{thingID}/{name}"),
        ];
        let mut td = json!({
            "id": "t1",
            "properties": {"temp": {"type": "number"}},
            "actions": {"reset": {"forms": [{"href": "custom"}]}},
            "events": {"alarm": {}}
        });
        add_td_forms(&mut td, &bindings, "https://hub");

        let top = td["forms"].as_array().unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["op"], "readallproperties");

        assert_eq!(td["properties"]["temp"]["forms"][0]["op"], "readproperty");
        let action_forms = td["actions"]["reset"]["forms"].as_array().unwrap();
        assert_eq!(action_forms.len(), 2);
        assert_eq!(action_forms[0]["href"], "custom");
        assert_eq!(td["events"]["alarm"]["forms"][0]["op"], "subscribeevent");
    }

    #[test]
    fn non_object_td_is_left_alone() {
        let mut td = json!("not a td");
        add_td_forms(&mut td, &[binding(Operation::ReadTd, "/x")], "https://hub");
        assert_eq!(td, json!("not a td"));
    }
}
