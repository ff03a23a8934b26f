//! Error types for nodewire
//!
//! Every failure a caller can observe is a variant of [`Error`]. The variants
//! fall into five families:
//!
//! - **Transport / connectivity**: no provider, provider detection failures,
//!   HTTP / WebSocket / IPC I/O failures, closed connections
//! - **Protocol violations**: malformed responses and structurally invalid
//!   batch responses
//! - **RPC-level errors**: a node answered with a JSON-RPC error object
//! - **Subscription errors**: unsupported, unknown, duplicate or inactive
//!   subscriptions
//! - **Timing**: operation timeouts and aborts
//!
//! # RPC error mapping
//!
//! Error objects returned by a node are classified by code into an
//! [`RpcErrorKind`]. The wire object is always kept as the cause so the
//! node's original message and data survive the mapping:
//!
//! | code     | kind                    |
//! |----------|-------------------------|
//! | `-32700` | `ParseError`            |
//! | `-32600` | `InvalidRequest`        |
//! | `-32601` | `MethodNotFound`        |
//! | `-32602` | `InvalidParams`         |
//! | `-32603` | `Internal`              |
//! | `-32000` | `InvalidInput`          |
//! | `-32001` | `ResourcesNotFound`     |
//! | `-32002` | `ResourceUnavailable`   |
//! | `-32003` | `TransactionRejected`   |
//! | `-32004` | `MethodNotSupported`    |
//! | `-32005` | `LimitExceeded`         |
//! | `-32006` | `VersionNotSupported`   |
//! | other    | `Generic`               |
//!
//! # Examples
//!
//! ```rust
//! use nodewire_core::{Error, JsonRpcErrorData, RpcError, RpcErrorKind};
//!
//! let wire = JsonRpcErrorData::new(-32601, "the method eth_foo does not exist");
//! let error = Error::from(RpcError::new(wire));
//!
//! assert_eq!(error.rpc_kind(), Some(RpcErrorKind::MethodNotFound));
//! assert!(error.to_string().contains("the method eth_foo does not exist"));
//! ```

use crate::types::Id;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for nodewire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for nodewire operations
///
/// The enum is `Clone` because one failure frequently fans out to many
/// waiters: a broken batch rejects every queued call, and a dropped socket
/// fails every pending request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No provider is configured on the request manager
    #[error("No provider set")]
    ProviderNotAvailable,

    /// A provider string could not be turned into a transport
    ///
    /// Raised for empty strings and for `scheme://` prefixes that do not
    /// name a known transport.
    #[error("Provider detection failed: {0}")]
    ProviderDetection(String),

    /// A provider object exposes none of the supported calling conventions
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// HTTP transport failure (connect, status code, body decoding)
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Input/output error, typically from an IPC socket
    #[error("IO error: {0}")]
    Io(String),

    /// The persistent connection is gone
    ///
    /// Requests still waiting for a response when a socket drops are failed
    /// with this error.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request could not be built or dispatched
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider answered with something that is not a usable response
    ///
    /// In permissive mode RPC error objects are also reported through this
    /// variant, with the wire object as `cause`.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// What was wrong with the response
        reason: String,
        /// The RPC error object, when one was received
        cause: Option<JsonRpcErrorData>,
    },

    /// A batch response did not contain one entry per request
    #[error("Invalid batch response: expected {expected} responses, got {}", describe_count(.actual))]
    BatchSizeMismatch {
        /// Number of requests in the batch
        expected: usize,
        /// Number of responses received, `None` when the response was not an array
        actual: Option<usize>,
    },

    /// A batch response's ids do not match the request ids
    #[error(
        "Invalid batch response: response ids [{}] do not match request ids [{}]",
        join_ids(.received),
        join_ids(.requested)
    )]
    BatchIdMismatch {
        /// Request ids in request order
        requested: Vec<Id>,
        /// Response ids in response order
        received: Vec<Id>,
    },

    /// Typed RPC error mapped from a node's error object
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Raw RPC error object
    ///
    /// Batch calls reject their per-call futures with the untouched wire
    /// error, and providers report node errors through this variant.
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// The current provider cannot carry server push subscriptions
    #[error("The current provider does not support subscriptions")]
    SubscriptionsNotSupported,

    /// No subscription type is registered under this name
    #[error("Invalid subscription type: {0}")]
    InvalidSubscriptionType(String),

    /// The subscription is already tracked under this id
    #[error("Subscription with id \"{0}\" already exists")]
    DuplicateSubscription(String),

    /// The subscription has no server-assigned id yet
    #[error("Subscription is not subscribed")]
    SubscriptionNotSubscribed,

    /// No active subscription is tracked under this id
    #[error("Subscription with id \"{0}\" does not exist")]
    SubscriptionNotFound(String),

    /// An operation did not complete within its deadline
    #[error("{0}")]
    OperationTimeout(String),

    /// An operation was abandoned because a related operation failed
    #[error("{0}")]
    OperationAbort(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an `InvalidResponse` error without an RPC cause
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Error::InvalidResponse {
            reason: reason.into(),
            cause: None,
        }
    }

    /// The RPC error kind, if this is a typed RPC error
    pub fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            Error::Rpc(rpc) => Some(rpc.kind),
            _ => None,
        }
    }

    /// The wire error object carried by this error, if any
    pub fn cause(&self) -> Option<&JsonRpcErrorData> {
        match self {
            Error::Rpc(rpc) => Some(&rpc.cause),
            Error::JsonRpc(data) => Some(data),
            Error::InvalidResponse { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    /// True for errors raised because a deadline passed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::OperationTimeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

fn describe_count(actual: &Option<usize>) -> String {
    match actual {
        Some(n) => n.to_string(),
        None => "a non-array response".to_string(),
    }
}

fn join_ids(ids: &[Id]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classification of a node's JSON-RPC error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    /// `-32700`: invalid JSON was received
    ParseError,
    /// `-32600`: the JSON sent is not a valid request object
    InvalidRequest,
    /// `-32601`: the method does not exist or is not available
    MethodNotFound,
    /// `-32602`: invalid method parameters
    InvalidParams,
    /// `-32603`: internal JSON-RPC error
    Internal,
    /// `-32000`: missing or invalid parameters
    InvalidInput,
    /// `-32001`: requested resource not found
    ResourcesNotFound,
    /// `-32002`: requested resource not available
    ResourceUnavailable,
    /// `-32003`: transaction creation failed
    TransactionRejected,
    /// `-32004`: method is not implemented
    MethodNotSupported,
    /// `-32005`: request exceeds a defined limit
    LimitExceeded,
    /// `-32006`: JSON-RPC protocol version is not supported
    VersionNotSupported,
    /// Any code without a dedicated kind
    Generic,
}

impl RpcErrorKind {
    /// Map a JSON-RPC error code to its kind
    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => RpcErrorKind::ParseError,
            -32600 => RpcErrorKind::InvalidRequest,
            -32601 => RpcErrorKind::MethodNotFound,
            -32602 => RpcErrorKind::InvalidParams,
            -32603 => RpcErrorKind::Internal,
            -32000 => RpcErrorKind::InvalidInput,
            -32001 => RpcErrorKind::ResourcesNotFound,
            -32002 => RpcErrorKind::ResourceUnavailable,
            -32003 => RpcErrorKind::TransactionRejected,
            -32004 => RpcErrorKind::MethodNotSupported,
            -32005 => RpcErrorKind::LimitExceeded,
            -32006 => RpcErrorKind::VersionNotSupported,
            _ => RpcErrorKind::Generic,
        }
    }

    /// Stable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorKind::ParseError => "ParseError",
            RpcErrorKind::InvalidRequest => "InvalidRequestError",
            RpcErrorKind::MethodNotFound => "MethodNotFoundError",
            RpcErrorKind::InvalidParams => "InvalidParamsError",
            RpcErrorKind::Internal => "InternalError",
            RpcErrorKind::InvalidInput => "InvalidInputError",
            RpcErrorKind::ResourcesNotFound => "ResourcesNotFoundError",
            RpcErrorKind::ResourceUnavailable => "ResourceUnavailableError",
            RpcErrorKind::TransactionRejected => "TransactionRejectedError",
            RpcErrorKind::MethodNotSupported => "MethodNotSupported",
            RpcErrorKind::LimitExceeded => "LimitExceededError",
            RpcErrorKind::VersionNotSupported => "VersionNotSupportedError",
            RpcErrorKind::Generic => "RpcError",
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node's error object classified by code
///
/// The display text always includes the node's original message.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    /// Classification derived from `cause.code`
    pub kind: RpcErrorKind,
    /// The error object exactly as received
    pub cause: JsonRpcErrorData,
}

impl RpcError {
    /// Classify a wire error object
    pub fn new(cause: JsonRpcErrorData) -> Self {
        Self {
            kind: RpcErrorKind::from_code(cause.code),
            cause,
        }
    }

    /// The node's error code
    pub fn code(&self) -> i32 {
        self.cause.code
    }

    /// The node's error message
    pub fn message(&self) -> &str {
        &self.cause.message
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (code {})", self.kind, self.cause.message, self.cause.code)
    }
}

impl std::error::Error for RpcError {}

/// JSON-RPC 2.0 error object as it appears on the wire
///
/// # Examples
///
/// ```rust
/// use nodewire_core::JsonRpcErrorData;
/// use serde_json::json;
///
/// let error = JsonRpcErrorData::with_data(
///     3,
///     "execution reverted",
///     json!("0x08c379a0"),
/// );
/// assert_eq!(error.code, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Error code
    pub code: i32,

    /// Short description of the error
    pub message: String,

    /// Additional node-specific information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    /// Create an error object without data
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error object with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    /// Kind this object maps to
    pub fn kind(&self) -> RpcErrorKind {
        RpcErrorKind::from_code(self.code)
    }
}

impl fmt::Display for JsonRpcErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}
