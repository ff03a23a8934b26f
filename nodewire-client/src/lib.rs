//! JSON-RPC client transport for blockchain nodes
//!
//! This crate delivers JSON-RPC calls to a node through whatever provider
//! is at hand, correlates the answers and keeps server push subscriptions
//! alive.
//!
//! # Core Features
//!
//! - **Provider adapter**: four provider calling conventions behind one
//!   `call(payload)`
//! - **Request manager**: envelopes, id generation, response validation,
//!   typed RPC errors
//! - **Batch requests**: many calls in one round trip, one future per call
//! - **Subscriptions**: `eth_subscribe` style push, re-established on
//!   provider change and reconnection
//! - **Transports**: HTTP, WebSocket and IPC, with reconnection for sockets
//! - **Observability**: OpenTelemetry metrics and `tracing` spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nodewire_client::RequestManager;
//! use nodewire_core::RpcCall;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = RequestManager::new();
//!     manager.set_provider("http://localhost:8545").await?;
//!
//!     let block = manager.send(RpcCall::new("eth_blockNumber")).await?;
//!     println!("Block: {}", block);
//!
//!     let balance = manager
//!         .send(
//!             RpcCall::new("eth_getBalance")
//!                 .with_param(json!("0x407d73d8a49eeb85d32cf465507dd71d507100c1"))
//!                 .with_param(json!("latest")),
//!         )
//!         .await?;
//!     println!("Balance: {}", balance);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Custom providers
//!
//! Implement one of the provider traits and hand the object over through
//! [`ProviderCapabilities`]; detection picks the richest convention it
//! exposes.
//!
//! ```rust
//! use async_trait::async_trait;
//! use nodewire_client::{Eip1193Provider, Provider, ProviderCapabilities, ProviderKind};
//! use nodewire_core::Result;
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct Injected;
//!
//! #[async_trait]
//! impl Eip1193Provider for Injected {
//!     async fn request(&self, _payload: Value) -> Result<Option<Value>> {
//!         Ok(Some(Value::from("0x1")))
//!     }
//! }
//!
//! impl ProviderCapabilities for Injected {
//!     fn as_eip1193(self: Arc<Self>) -> Option<Arc<dyn Eip1193Provider>> {
//!         Some(self)
//!     }
//! }
//!
//! let provider = Provider::detect(Arc::new(Injected)).unwrap();
//! assert_eq!(provider.kind(), ProviderKind::Eip1193);
//! ```

mod adapter;
mod batch;
mod builder;
mod connection_state;
mod manager;
mod metrics;
mod pending;
mod provider;
mod reconnect;
mod subscription;
mod subscription_manager;
mod transport;

pub use adapter::{detect_url, Provider, ProviderKind, TransportKind};
pub use batch::BatchRequest;
pub use builder::RequestManagerBuilder;
pub use connection_state::{ConnectionManager, ConnectionState};
pub use manager::{
    ManagerConfig, PollId, ProviderEvent, ProviderSource, RequestEvent, RequestManager,
    DEFAULT_BATCH_TIMEOUT,
};
pub use metrics::ClientMetrics;
pub use pending::{PendingRequests, Ticket};
pub use provider::{
    Eip1193Provider, LegacyAsyncProvider, LegacyCallbackProvider, Listener, ListenerId,
    ListenerRegistry, ProviderCallback, ProviderCapabilities, ProviderMessage,
    SubscribableProvider,
};
pub use reconnect::{
    strategy_factory, ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy,
    StrategyFactory,
};
pub use subscription::{
    Logs, NewHeads, NewPendingTransactions, Subscription, SubscriptionCallback,
    SubscriptionEvent, SubscriptionType, Syncing,
};
pub use subscription_manager::SubscriptionManager;
#[cfg(unix)]
pub use transport::IpcProvider;
pub use transport::{
    Connector, FrameSink, FrameStream, HttpProvider, HttpProviderConfig, SocketClient,
    SocketConfig, TransportConfig, WebSocketProvider,
};
