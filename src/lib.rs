//! nodewire - JSON-RPC transport for blockchain nodes
//!
//! This is the convenience crate that re-exports the nodewire sub-crates.
//! Use it when a single dependency is preferred.
//!
//! # Architecture
//!
//! - **nodewire-core**: wire types, codec, error taxonomy, deferred futures,
//!   event channels, observability
//! - **nodewire-client**: provider adapters, request manager, batches,
//!   subscriptions and the HTTP, WebSocket and IPC transports
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use nodewire::{RequestManagerBuilder, RpcCall, SubscriptionManager};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = RequestManagerBuilder::new()
//!         .with_provider("ws://localhost:8546")
//!         .build()
//!         .await?;
//!
//!     let block = manager.send(RpcCall::new("eth_blockNumber")).await?;
//!     println!("Block: {}", block);
//!
//!     let mut batch = manager.batch();
//!     let chain = batch.add(RpcCall::new("eth_chainId"));
//!     let peers = batch.add(RpcCall::new("net_peerCount"));
//!     batch.execute().await?;
//!     println!("Chain {} with {} peers", chain.await?, peers.await?);
//!
//!     let subscriptions = SubscriptionManager::new(manager.clone());
//!     subscriptions
//!         .subscribe(
//!             "newHeads",
//!             Value::Null,
//!             Some(Arc::new(|head: nodewire::Result<Value>| println!("Head: {:?}", head))),
//!         )
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     subscriptions.clear().await?;
//!     Ok(())
//! }
//! ```

pub use nodewire_client as client;
pub use nodewire_core as core;

pub use nodewire_client::{
    BatchRequest, Provider, ProviderKind, RequestManager, RequestManagerBuilder, Subscription,
    SubscriptionManager,
};
pub use nodewire_core::{Error, Id, Result, RpcCall, RpcErrorKind};
