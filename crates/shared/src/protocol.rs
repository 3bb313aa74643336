use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{domain::EventName, error::ProtocolParseError};

/// Records on the wire are terminated by CRLF in both directions.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Keys that carry the event type, in lookup order. The guiding server uses
/// `Event`; the lowercase forms are accepted for synthetic and test traffic.
const EVENT_TYPE_KEYS: [&str; 3] = ["Event", "event", "type"];

/// Event name used when the peer reports an error to a request.
pub const ERROR_EVENT: &str = "error";

/// The greeting the guiding server sends when a session opens.
pub const VERSION_EVENT: &str = "Version";

/// A single value pulled out of an event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// The payload has no value at the requested path.
    Absent,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Arrays and objects, kept verbatim.
    Structured(Value),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number
                .as_f64()
                .map_or_else(|| Self::Text(number.to_string()), Self::Number),
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(_) | Value::Object(_) => Self::Structured(value.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("--"),
            Self::Null => f.write_str("null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
            Self::Structured(value) => write!(f, "{value}"),
        }
    }
}

/// The fields of one event, addressable by flat key or dotted path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wraps an arbitrary JSON value; non-object values land under `result`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self(fields),
            other => {
                let mut fields = Map::new();
                fields.insert("result".to_string(), other);
                Self(fields)
            }
        }
    }

    /// Looks up `path`, falling back to a dotted walk through nested objects
    /// (numeric segments index into arrays). Never fails: a missing value is
    /// [`FieldValue::Absent`].
    pub fn field(&self, path: &str) -> FieldValue {
        if let Some(value) = self.0.get(path) {
            return FieldValue::from(value);
        }

        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return FieldValue::Absent;
        };
        let mut current = match self.0.get(first) {
            Some(value) => value,
            None => return FieldValue::Absent,
        };
        for segment in segments {
            let next = match current {
                Value::Object(fields) => fields.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return FieldValue::Absent,
            }
        }
        FieldValue::from(current)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: EventName,
    pub payload: Payload,
    pub raw: String,
}

impl InboundEvent {
    /// An event produced inside the client rather than read off the wire.
    pub fn synthetic(name: impl Into<EventName>, payload: Payload) -> Self {
        let name = name.into();
        let raw = Value::Object(payload.fields().clone()).to_string();
        Self { name, payload, raw }
    }
}

/// Error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcErrorBody {
    fn from_value(value: &Value) -> Self {
        serde_json::from_value::<Self>(value.clone()).unwrap_or_else(|_| Self {
            code: 0,
            message: match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: Value,
    pub outcome: Result<Value, RpcErrorBody>,
    pub raw: String,
}

impl Reply {
    /// The correlation id when it is one this client could have issued.
    pub fn client_id(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownMessage {
    pub raw: String,
    pub reason: ProtocolParseError,
}

/// One inbound record after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Event(InboundEvent),
    Reply(Reply),
    Unknown(UnknownMessage),
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Self {
        match Self::classify(raw) {
            Ok(message) => message,
            Err(reason) => Self::Unknown(UnknownMessage {
                raw: raw.to_string(),
                reason,
            }),
        }
    }

    fn classify(raw: &str) -> Result<Self, ProtocolParseError> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|err| ProtocolParseError::InvalidJson(err.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolParseError::NotAnObject);
        };

        let is_reply = fields.contains_key("id")
            && (fields.contains_key("result")
                || fields.contains_key("error")
                || fields.contains_key("jsonrpc"));
        if is_reply {
            let id = fields.remove("id").unwrap_or(Value::Null);
            let outcome = match fields.remove("error").filter(|error| !error.is_null()) {
                Some(error) => Err(RpcErrorBody::from_value(&error)),
                None => Ok(fields.remove("result").unwrap_or(Value::Null)),
            };
            return Ok(Self::Reply(Reply {
                id,
                outcome,
                raw: raw.to_string(),
            }));
        }

        let name = EVENT_TYPE_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(EventName::from)
            .ok_or(ProtocolParseError::Unclassified)?;
        Ok(Self::Event(InboundEvent {
            name,
            payload: Payload::new(fields),
            raw: raw.to_string(),
        }))
    }
}

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl RpcRequest {
    /// Builds an envelope; a scalar parameter is sent as a one-element array.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        let params = params.map(|params| match params {
            Value::Array(_) | Value::Object(_) => params,
            scalar => Value::Array(vec![scalar]),
        });
        Self {
            method: method.into(),
            params,
            id,
        }
    }

    /// Compact JSON without the line terminator.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
