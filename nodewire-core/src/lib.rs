//! Core types for the nodewire JSON-RPC transport layer
//!
//! This crate holds everything that does not depend on a particular
//! transport:
//!
//! - **Types**: request, response and push envelopes, caller-side calls
//! - **Codec**: payload encoding and classification of incoming frames
//! - **Error handling**: the error taxonomy shared by every nodewire crate,
//!   including the mapping from node error codes to typed errors
//! - **Deferred**: externally settled futures with optional deadlines
//! - **Events**: typed broadcast channels that run alongside futures
//! - **Observability**: OpenTelemetry and `tracing` setup
//!
//! # Example
//!
//! ```rust
//! use nodewire_core::{codec, Id, RpcCall};
//! use serde_json::json;
//!
//! let request = RpcCall::new("eth_getBlockByNumber")
//!     .with_param(json!("latest"))
//!     .with_param(json!(false))
//!     .into_request(|| Id::Number(1));
//!
//! let payload = codec::to_payload(&request).unwrap();
//! assert_eq!(payload["method"], "eth_getBlockByNumber");
//! ```

pub mod codec;
pub mod deferred;
pub mod error;
pub mod events;
pub mod observability;
pub mod types;

pub use deferred::{deferred, deferred_with_timeout, DeferredFuture, Resolver};
pub use error::{Error, JsonRpcErrorData, Result, RpcError, RpcErrorKind};
pub use events::{EventChannel, EventStream, Evented};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    Id, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcCall,
    JSONRPC_VERSION,
};
