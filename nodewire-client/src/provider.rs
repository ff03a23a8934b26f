//! Provider calling conventions
//!
//! A provider is anything that can carry a JSON-RPC payload to a node.
//! Four incompatible conventions exist in the wild and each has its own
//! trait here:
//!
//! - [`Eip1193Provider`]: `request(payload)` returns a future; a missing
//!   value means a `null` result
//! - [`LegacyCallbackProvider`]: `send(payload, callback)` reports through an
//!   error-first callback
//! - [`LegacyAsyncProvider`]: `send_async(payload)` returns a future
//! - [`SubscribableProvider`]: a future-returning provider that can also push
//!   server messages to registered listeners
//!
//! Objects that implement several conventions expose them through
//! [`ProviderCapabilities`]; [`Provider::detect`](crate::Provider::detect)
//! probes those capabilities once and fixes the convention.

use async_trait::async_trait;
use nodewire_core::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Future-returning provider in the EIP-1193 style
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Send a request or batch payload. Node errors are reported as
    /// `Err(Error::JsonRpc(..))`.
    async fn request(&self, payload: Value) -> Result<Option<Value>>;
}

/// Error-first completion callback of a legacy provider
pub type ProviderCallback = Box<dyn FnOnce(Result<Option<Value>>) + Send>;

/// Callback-based legacy provider
pub trait LegacyCallbackProvider: Send + Sync {
    /// Send a payload; `callback` must be invoked at most once
    fn send(&self, payload: Value, callback: ProviderCallback);
}

/// Future-returning legacy provider
#[async_trait]
pub trait LegacyAsyncProvider: Send + Sync {
    async fn send_async(&self, payload: Value) -> Result<Option<Value>>;
}

/// Messages a subscribable provider pushes to its listeners
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    /// A server push such as `eth_subscription`, as received
    Message(Value),
    /// The underlying connection is (re)established
    Connected,
    /// The underlying connection dropped
    Disconnected,
}

/// Handle returned by [`SubscribableProvider::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Listener callback for provider messages
pub type Listener = Arc<dyn Fn(ProviderMessage) + Send + Sync>;

/// Provider that can push server messages
#[async_trait]
pub trait SubscribableProvider: Send + Sync {
    async fn request(&self, payload: Value) -> Result<Option<Value>>;

    /// Whether the transport can carry subscriptions at all
    fn supports_subscriptions(&self) -> bool;

    fn on(&self, listener: Listener) -> ListenerId;

    /// Returns false when the id was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Capability probes used by provider detection
///
/// Implement the probes for the conventions the object supports; the
/// defaults report "not supported".
pub trait ProviderCapabilities: Send + Sync + 'static {
    fn as_subscribable(self: Arc<Self>) -> Option<Arc<dyn SubscribableProvider>> {
        None
    }

    fn as_eip1193(self: Arc<Self>) -> Option<Arc<dyn Eip1193Provider>> {
        None
    }

    fn as_legacy_async(self: Arc<Self>) -> Option<Arc<dyn LegacyAsyncProvider>> {
        None
    }

    fn as_legacy_callback(self: Arc<Self>) -> Option<Arc<dyn LegacyCallbackProvider>> {
        None
    }
}

/// Listener registry shared by subscribable transports
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, listener);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a message to every listener
    ///
    /// Listeners run outside the registry lock, so they may add or remove
    /// listeners themselves.
    pub fn emit(&self, message: ProviderMessage) {
        let listeners: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(message.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerId, Listener>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
