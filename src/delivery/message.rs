//! Normalized inbound message shape.
//!
//! Provider payloads arrive with the identifier under either `id` or
//! `message_id`, as a string or a number. Adapters at the ingestion boundary
//! (the push collaborator and the poll fetcher) convert them once into an
//! [`InboundMessage`]; the queue and controller only ever see that type.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Channel a message was obtained from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Push,
    Pull,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::Push => write!(f, "push"),
            MessageSource::Pull => write!(f, "pull"),
        }
    }
}

/// Errors converting a raw provider payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Provider message must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
    #[error("Provider message has no usable 'id' or 'message_id'")]
    MissingId,
}

/// A provider message in the one shape the delivery engine operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider message identifier, the deduplication key
    pub id: String,
    /// Forwarded verbatim to the application
    pub payload: Value,
    /// Provider-side creation time, when the provider supplies one
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Normalize a raw provider JSON object.
    ///
    /// The id is taken from `id`, falling back to `message_id`; both accept a
    /// non-empty string or an integer. `timestamp` may be RFC 3339 or epoch
    /// seconds (number or numeric string). The whole object becomes the payload.
    pub fn from_provider_json(value: Value) -> Result<Self, MessageError> {
        let object = match &value {
            Value::Object(object) => object,
            other => {
                return Err(MessageError::NotAnObject {
                    kind: json_kind(other),
                })
            }
        };

        let id = ["id", "message_id"]
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(id_from_value)
            .ok_or(MessageError::MissingId)?;
        let timestamp = object.get("timestamp").and_then(timestamp_from_value);

        Ok(Self {
            id,
            payload: value,
            timestamp,
        })
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            if let Ok(secs) = s.parse::<i64>() {
                return Utc.timestamp_opt(secs, 0).single();
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
