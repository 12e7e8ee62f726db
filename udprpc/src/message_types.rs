//! JSON-RPC 2.0 message bodies and the envelope that carries them over the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Identifies one outbound request so that its response can be matched up again.
pub type CallId = u64;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes reserved by JSON-RPC 2.0, plus the engine's own timeout codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A single attempt received no response in time. The engine retries these.
    pub const ATTEMPT_TIMEOUT: i64 = 3;
    /// The overall retry budget for a call ran out.
    pub const RETRIES_EXHAUSTED: i64 = 4;
}

/// A JSON-RPC 2.0 error object.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }
}

/// A JSON-RPC 2.0 request. A request without an id is a notification and is never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CallId>,
}

impl RequestBody {
    pub fn call(id: CallId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params, id: Some(id) }
    }

    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params, id: None }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` and `error` is set when built through the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    pub id: CallId,
}

impl ResponseBody {
    pub fn success(id: CallId, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: Some(result), error: None, id }
    }

    pub fn failure(id: CallId, error: ErrorObject) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: None, error: Some(error), id }
    }

    pub fn from_outcome(id: CallId, outcome: Result<Value, ErrorObject>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::failure(id, error),
        }
    }

    /// An `error` field marks a failure, whatever else the response carries. A missing `result` reads as `null`.
    pub fn into_outcome(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The discriminant carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Request => write!(f, "request"),
            MessageType::Response => write!(f, "response"),
        }
    }
}

/// The only unit that is ever placed on the wire: `{"message_type": "request"|"response", "body": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "body", rename_all = "lowercase")]
pub enum Envelope {
    Request(RequestBody),
    Response(ResponseBody),
}

impl Envelope {
    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::Request(_) => MessageType::Request,
            Envelope::Response(_) => MessageType::Response,
        }
    }
}

impl From<RequestBody> for Envelope {
    fn from(body: RequestBody) -> Self {
        Envelope::Request(body)
    }
}

impl From<ResponseBody> for Envelope {
    fn from(body: ResponseBody) -> Self {
        Envelope::Response(body)
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Envelope::Request(req) => match req.id {
                Some(id) => write!(f, "Request #{id} ({})", req.method),
                None => write!(f, "Notification ({})", req.method),
            },
            Envelope::Response(res) if res.error.is_some() => write!(f, "Error response #{}", res.id),
            Envelope::Response(res) => write!(f, "Response #{}", res.id),
        }
    }
}
