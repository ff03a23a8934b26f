//! Encoding and classification of JSON-RPC payloads
//!
//! Providers hand back raw JSON. The helpers here turn that JSON into typed
//! messages and answer the structural questions the transport layer asks:
//! is this a response envelope or a bare result, which ids does a payload
//! carry, is an incoming frame a push or a response.
//!
//! # Examples
//!
//! ```rust
//! use nodewire_core::{codec, Id, JsonRpcRequest};
//!
//! let request = JsonRpcRequest::new("eth_chainId", vec![], Id::Number(1));
//! let payload = codec::to_payload(&request).unwrap();
//!
//! assert_eq!(codec::payload_ids(&payload), vec![Id::Number(1)]);
//! ```

use crate::error::{Error, Result};
use crate::types::{Id, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialize any message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a JSON string into a concrete type
pub fn decode_as<'de, T: Deserialize<'de>>(data: &'de str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Convert a request into the JSON payload handed to a provider
pub fn to_payload(request: &JsonRpcRequest) -> Result<Value> {
    serde_json::to_value(request).map_err(|e| Error::Serialization(e.to_string()))
}

/// Convert a list of requests into a batch payload
pub fn to_batch_payload(requests: &[JsonRpcRequest]) -> Result<Value> {
    serde_json::to_value(requests).map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse an incoming frame
pub fn decode(data: &str) -> Result<JsonRpcMessage> {
    let value: Value = decode_as(data)?;
    classify(value)
}

/// Classify an already parsed frame by shape
///
/// Arrays are batches, objects with a `method` member are pushes, and any
/// other object is treated as a response.
pub fn classify(value: Value) -> Result<JsonRpcMessage> {
    if value.get("method").is_some() {
        let notification: JsonRpcNotification = serde_json::from_value(value)?;
        return Ok(JsonRpcMessage::Notification(notification));
    }

    match value {
        Value::Array(items) => Ok(JsonRpcMessage::Batch(items)),
        Value::Object(_) => {
            let response: JsonRpcResponse = serde_json::from_value(value)?;
            Ok(JsonRpcMessage::Response(response))
        }
        other => Err(Error::invalid_response(format!(
            "expected a JSON-RPC object or array, got {}",
            other
        ))),
    }
}

/// True when a value looks like a full response envelope rather than a bare
/// result
pub fn is_response_envelope(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => {
            map.contains_key("jsonrpc")
                && map.contains_key("id")
                && (map.contains_key("result") || map.contains_key("error"))
        }
        None => false,
    }
}

/// Parse a single response envelope
pub fn decode_response(value: Value) -> Result<JsonRpcResponse> {
    serde_json::from_value(value)
        .map_err(|e| Error::invalid_response(format!("malformed response envelope: {}", e)))
}

/// Ids carried by a request or batch payload, in payload order
pub fn payload_ids(payload: &Value) -> Vec<Id> {
    match payload {
        Value::Array(items) => items.iter().filter_map(Id::from_value).collect(),
        other => Id::from_value(other).into_iter().collect(),
    }
}
