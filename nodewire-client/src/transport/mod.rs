//! Built-in transports
//!
//! - [`HttpProvider`]: one POST per payload, EIP-1193 convention, no push
//! - [`WebSocketProvider`]: persistent socket with push and reconnection
//! - [`IpcProvider`]: Unix domain socket with push and reconnection (unix only)
//!
//! Both socket transports share the connection task in [`socket`]; they
//! differ only in how a connection is opened and framed.

mod http;
#[cfg(unix)]
mod ipc;
pub(crate) mod socket;
mod ws;

pub use http::{HttpProvider, HttpProviderConfig};
#[cfg(unix)]
pub use ipc::IpcProvider;
pub use socket::{Connector, FrameSink, FrameStream, SocketClient};
pub use ws::WebSocketProvider;

use crate::metrics::ClientMetrics;
use crate::reconnect::{strategy_factory, ExponentialBackoff, StrategyFactory};
use std::sync::Arc;

/// Settings shared by the socket transports
#[derive(Clone)]
pub struct SocketConfig {
    /// Builds a fresh strategy for every connection
    pub reconnect: StrategyFactory,
    pub metrics: Option<Arc<ClientMetrics>>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect: strategy_factory(ExponentialBackoff::default()),
            metrics: None,
        }
    }
}

impl std::fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConfig")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Settings for transports built from a provider string
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub http: HttpProviderConfig,
    pub socket: SocketConfig,
}
