//! Task descriptor (the unit of work that travels over the bus).
//!
//! The JSON shape follows the host task framework's signature encoding, so
//! messages produced by other clients of the same queue decode unchanged.
//! Keys the adapter does not know about are kept in `extra` and written back
//! on encode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One positional argument of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Arg {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "Type", default)]
    pub kind: String,

    #[serde(default)]
    pub value: Value,
}

impl Arg {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            value,
        }
    }
}

/// Task descriptor.
///
/// `uuid` doubles as the transport message id, so it must stay stable from
/// publish to consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signature {
    #[serde(rename = "UUID", default)]
    pub uuid: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub routing_key: String,

    /// Earliest execution time. Serialized as RFC3339.
    #[serde(rename = "ETA", default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,

    #[serde(rename = "GroupUUID", default)]
    pub group_uuid: String,

    #[serde(default)]
    pub group_task_count: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<Arg>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Map<String, Value>,

    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub immutable: bool,

    #[serde(default)]
    pub retry_count: i64,

    #[serde(default)]
    pub retry_timeout: i64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub on_success: Vec<Signature>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub on_error: Vec<Signature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord_callback: Option<Box<Signature>>,

    #[serde(default)]
    pub broker_message_group_id: String,

    /// Dead-letter (instead of requeue) when no worker knows this task name.
    #[serde(default)]
    pub ignore_when_task_not_registered: bool,

    /// Keys this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Signature {
    /// Create a signature with a fresh `task_<uuid>` identifier.
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            uuid: format!("task_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            routing_key: String::new(),
            eta: None,
            group_uuid: String::new(),
            group_task_count: 0,
            args,
            headers: Map::new(),
            priority: 0,
            immutable: false,
            retry_count: 0,
            retry_timeout: 0,
            on_success: Vec::new(),
            on_error: Vec::new(),
            chord_callback: None,
            broker_message_group_id: String::new(),
            ignore_when_task_not_registered: false,
            extra: Map::new(),
        }
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn ignore_when_not_registered(mut self) -> Self {
        self.ignore_when_task_not_registered = true;
        self
    }

    /// Named args as a JSON object (`{"<Name>": <Value>, ...}`).
    ///
    /// Unnamed args are keyed by their position.
    pub fn named_args(&self) -> Map<String, Value> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let key = if arg.name.is_empty() {
                    i.to_string()
                } else {
                    arg.name.clone()
                };
                (key, arg.value.clone())
            })
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_signature_gets_task_prefixed_uuid() {
        let a = Signature::new("add", vec![]);
        let b = Signature::new("add", vec![]);
        assert!(a.uuid.starts_with("task_"));
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn serializes_with_framework_key_names() {
        let sig = Signature::new("add", vec![Arg::new("a", "int64", json!(1))]);
        let v = serde_json::to_value(&sig).unwrap();
        assert_eq!(v["Name"], "add");
        assert_eq!(v["UUID"], Value::String(sig.uuid.clone()));
        assert_eq!(v["Args"][0]["Type"], "int64");
        assert_eq!(v["IgnoreWhenTaskNotRegistered"], false);
        assert!(v.get("ETA").is_none());
    }

    #[test]
    fn null_collections_decode_as_empty() {
        let raw = json!({
            "UUID": "task_1",
            "Name": "add",
            "Args": null,
            "Headers": null,
            "OnSuccess": null,
            "OnError": null,
        });
        let sig: Signature = serde_json::from_value(raw).unwrap();
        assert!(sig.args.is_empty());
        assert!(sig.headers.is_empty());
        assert!(sig.on_success.is_empty());
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let raw = json!({ "UUID": "task_1", "Name": "add", "SQSReceiptHandle": "abc" });
        let sig: Signature = serde_json::from_value(raw).unwrap();
        assert_eq!(sig.extra["SQSReceiptHandle"], "abc");

        let back = serde_json::to_value(&sig).unwrap();
        assert_eq!(back["SQSReceiptHandle"], "abc");
    }

    #[test]
    fn named_args_uses_position_for_unnamed() {
        let sig = Signature::new(
            "add",
            vec![
                Arg::new("a", "int64", json!(1)),
                Arg::new("", "int64", json!(2)),
            ],
        );
        let args = sig.named_args();
        assert_eq!(args["a"], json!(1));
        assert_eq!(args["1"], json!(2));
    }
}
