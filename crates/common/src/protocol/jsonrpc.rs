// JSON-RPC 2.0 envelope for the bridge's tool protocol.
//
// One message per socket frame. Decoding is strict about the envelope shape
// so non-protocol frames (heartbeats, acks) can be told apart and dropped.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Request ID: integer or string. An absent ID marks a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "\"{value}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
            .with_data(serde_json::json!({ "method": method }))
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params")
            .with_data(serde_json::json!({ "reason": reason.into() }))
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error")
            .with_data(serde_json::json!({ "reason": reason.into() }))
    }
}

/// A decoded protocol message.
///
/// Exactly one of method+params, result, or error is present on the wire.
/// The variants make the other combinations unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum Message {
    Request { id: RequestId, method: String, params: Option<Value> },
    Notification { method: String, params: Option<Value> },
    Response { id: RequestId, result: Value },
    ErrorResponse { id: RequestId, error: RpcError },
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request { id: id.into(), method: method.into(), params }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification { method: method.into(), params }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response { id, result }
    }

    pub fn error_response(id: RequestId, error: RpcError) -> Self {
        Self::ErrorResponse { id, error }
    }

    /// Identifier of requests and responses; `None` for notifications.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::ErrorResponse { id, .. } => {
                Some(id)
            }
            Self::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } | Self::ErrorResponse { .. } => None,
        }
    }

    /// Serializes to a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decodes one socket frame. Anything that is not a well-formed envelope
/// yields `None`.
pub fn decode_frame(frame: &[u8]) -> Option<Message> {
    serde_json::from_slice(frame).ok()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("unsupported jsonrpc version `{0}`")]
    Version(String),

    #[error("message carries both a method and a result or error")]
    MethodWithOutcome,

    #[error("message carries both a result and an error")]
    ResultAndError,

    #[error("response is missing an id")]
    MissingId,

    #[error("message has no method, result or error")]
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawMessage {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

// `"result": null` is a real result, so presence must survive deserialization.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawMessage> for Message {
    type Error = EnvelopeError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        if raw.jsonrpc != JSONRPC_VERSION {
            return Err(EnvelopeError::Version(raw.jsonrpc));
        }

        match (raw.method, raw.result, raw.error) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(EnvelopeError::MethodWithOutcome),
            (None, Some(_), Some(_)) => Err(EnvelopeError::ResultAndError),
            (Some(method), None, None) => Ok(match raw.id {
                Some(id) => Self::Request { id, method, params: raw.params },
                None => Self::Notification { method, params: raw.params },
            }),
            (None, Some(result), None) => {
                let id = raw.id.ok_or(EnvelopeError::MissingId)?;
                Ok(Self::Response { id, result })
            }
            (None, None, Some(error)) => {
                let id = raw.id.ok_or(EnvelopeError::MissingId)?;
                Ok(Self::ErrorResponse { id, error })
            }
            (None, None, None) => Err(EnvelopeError::Empty),
        }
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        let mut raw = RawMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match message {
            Message::Request { id, method, params } => {
                raw.id = Some(id);
                raw.method = Some(method);
                raw.params = params;
            }
            Message::Notification { method, params } => {
                raw.method = Some(method);
                raw.params = params;
            }
            Message::Response { id, result } => {
                raw.id = Some(id);
                raw.result = Some(result);
            }
            Message::ErrorResponse { id, error } => {
                raw.id = Some(id);
                raw.error = Some(error);
            }
        }
        raw
    }
}
