//! JSON-RPC 2.0 types used between a caller and a blockchain node
//!
//! # Message Types
//!
//! - [`RpcCall`]: the caller-side description of a call. The id is optional
//!   and filled in by the request manager when the call is dispatched.
//! - [`JsonRpcRequest`]: the envelope that goes on the wire. Parameters are
//!   always positional, as node APIs expect.
//! - [`JsonRpcResponse`]: a node's answer, carrying either `result` or
//!   `error`.
//! - [`JsonRpcNotification`]: a server push message such as
//!   `eth_subscription`.
//!
//! # Request IDs
//!
//! Ids only correlate requests with responses; they are compared for
//! equality and never interpreted.

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier
///
/// JSON-RPC 2.0 allows string, number or null ids. Nodes echo them back
/// unchanged, so equality is the only operation the client needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(i64),
    #[default]
    Null,
}

impl Id {
    /// Read the `id` member of a raw JSON object
    pub fn from_value(value: &Value) -> Option<Id> {
        value
            .get("id")
            .and_then(|id| serde_json::from_value(id.clone()).ok())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n as i64)
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Caller-side request description
///
/// Built with pure builder functions: every method consumes the call and
/// returns a new value, so a call handed to the transport layer is never
/// mutated behind the caller's back.
///
/// ```rust
/// use nodewire_core::{Id, RpcCall};
/// use serde_json::json;
///
/// let call = RpcCall::new("eth_getBalance")
///     .with_param(json!("0x407d73d8a49eeb85d32cf465507dd71d507100c1"))
///     .with_param(json!("latest"));
///
/// let request = call.into_request(|| Id::Number(7));
/// assert_eq!(request.id, Id::Number(7));
/// assert_eq!(request.params.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    /// Explicit id; assigned at dispatch when absent
    pub id: Option<Id>,
    /// Method name
    pub method: String,
    /// Positional parameters
    pub params: Vec<Value>,
}

impl RpcCall {
    /// A call without parameters
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Vec::new(),
        }
    }

    /// Replace the parameter list
    pub fn with_params(self, params: Vec<Value>) -> Self {
        Self { params, ..self }
    }

    /// Append one parameter
    pub fn with_param(mut self, param: Value) -> Self {
        self.params.push(param);
        self
    }

    /// Append a serializable parameter
    pub fn with_serialized_param<T: Serialize>(self, param: &T) -> crate::Result<Self> {
        let value = serde_json::to_value(param)?;
        Ok(self.with_param(value))
    }

    /// Fix the id instead of letting the manager assign one
    pub fn with_id(self, id: impl Into<Id>) -> Self {
        Self {
            id: Some(id.into()),
            ..self
        }
    }

    /// Turn the call into a wire request, drawing an id when none was set
    pub fn into_request(self, next_id: impl FnOnce() -> Id) -> JsonRpcRequest {
        let id = match self.id {
            Some(id) => id,
            None => next_id(),
        };
        JsonRpcRequest::new(self.method, self.params, id)
    }
}

/// JSON-RPC request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: Id,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Server push message (no id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Subscription id of an `eth_subscription`-style push
    pub fn subscription_id(&self) -> Option<&str> {
        self.params.get("subscription").and_then(Value::as_str)
    }
}

// A `result` that is present but null must stay distinguishable from a
// missing one, so presence alone decides `Some`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC response envelope
///
/// `result` is `Some(Value::Null)` when the node sent `"result": null` and
/// `None` when the member was missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    #[serde(default)]
    pub id: Id,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcErrorData, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Incoming message classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Answer to a single request
    Response(JsonRpcResponse),
    /// Server push
    Notification(JsonRpcNotification),
    /// Array of responses, kept raw for per-entry correlation
    Batch(Vec<Value>),
}

impl JsonRpcMessage {
    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Notification(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_))
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, JsonRpcMessage::Batch(_))
    }
}
