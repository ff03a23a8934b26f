//! Subscription manager
//!
//! Tracks live subscriptions by server-assigned id and routes the
//! provider's push messages to them.
//!
//! # Consistency
//!
//! - a subscription enters the map only after its subscribe call succeeded
//! - a server-assigned id maps to exactly one subscription
//! - when the provider is replaced, or a socket reconnects after a drop,
//!   every tracked subscription subscribes again; failures are reported to
//!   the subscription as an error and it leaves the map
//!
//! ```rust,no_run
//! use nodewire_client::{RequestManager, SubscriptionManager};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! # async fn example() -> nodewire_core::Result<()> {
//! let manager = RequestManager::new();
//! manager.set_provider("ws://localhost:8546").await?;
//!
//! let subscriptions = SubscriptionManager::new(manager);
//! let heads = subscriptions
//!     .subscribe(
//!         "newHeads",
//!         Value::Null,
//!         Some(Arc::new(|head: nodewire_core::Result<Value>| println!("new head: {:?}", head))),
//!     )
//!     .await?;
//!
//! subscriptions.remove_subscription(&heads).await?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::Provider;
use crate::manager::{ProviderEvent, RequestManager};
use crate::provider::{Listener, ListenerId, ProviderMessage, SubscribableProvider};
use crate::subscription::{
    Logs, NewHeads, NewPendingTransactions, Subscription, SubscriptionCallback, SubscriptionType,
    Syncing,
};
use nodewire_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;

struct Tracked {
    sub: Subscription,
    /// Provider the subscription was established on
    provider: Provider,
}

struct ListenerSlot {
    provider: Arc<dyn SubscribableProvider>,
    id: ListenerId,
}

struct Inner {
    manager: RequestManager,
    types: Mutex<HashMap<String, Arc<dyn SubscriptionType>>>,
    subscriptions: Mutex<HashMap<String, Tracked>>,
    listener: Mutex<Option<ListenerSlot>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    /// Set when the socket dropped; the next `Connected` resubscribes
    disconnected: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Inner {
    fn subs(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        lock(&self.subscriptions)
    }

    /// Remove and return the entries not established on `provider`;
    /// every entry when `provider` is `None`
    fn take_stale(&self, provider: Option<&Provider>) -> Vec<Subscription> {
        let mut subs = self.subs();
        let stale: Vec<String> = subs
            .iter()
            .filter(|(_, t)| !provider.is_some_and(|p| t.provider.same_as(p)))
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| subs.remove(id))
            .map(|t| t.sub)
            .collect()
    }

    /// Point the push listener at `provider`, detaching it from any other
    fn attach(self: &Arc<Self>, provider: Option<&Provider>) {
        let target = provider
            .and_then(Provider::as_subscribable)
            .filter(|p| p.supports_subscriptions())
            .cloned();

        let mut slot = lock(&self.listener);
        if let (Some(current), Some(next)) = (slot.as_ref(), target.as_ref()) {
            if same_provider(&current.provider, next) {
                return;
            }
        }

        if let Some(old) = slot.take() {
            old.provider.remove_listener(old.id);
        }

        if let Some(provider) = target {
            let weak: Weak<Inner> = Arc::downgrade(self);
            let listener: Listener = Arc::new(move |message| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(message);
                }
            });
            let id = provider.on(listener);
            *slot = Some(ListenerSlot { provider, id });
        }
    }

    fn on_message(self: &Arc<Self>, message: ProviderMessage) {
        match message {
            ProviderMessage::Message(frame) => self.dispatch(frame),
            ProviderMessage::Disconnected => {
                self.disconnected.store(true, Ordering::SeqCst);
            }
            ProviderMessage::Connected => {
                if self.disconnected.swap(false, Ordering::SeqCst) {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        let subs = inner.take_stale(None);
                        inner.resubscribe(subs).await;
                    });
                }
            }
        }
    }

    fn dispatch(&self, frame: Value) {
        let params = match frame.get("params") {
            Some(params) => params,
            None => {
                tracing::debug!("Ignoring push message without params");
                return;
            }
        };

        let id = match params.get("subscription") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                tracing::debug!("Ignoring push message without subscription id");
                return;
            }
        };

        let subscription = self.subs().get(&id).map(|t| t.sub.clone());
        match subscription {
            Some(sub) => {
                let payload = params.get("result").unwrap_or(params).clone();
                sub.deliver(payload);
            }
            None => {
                tracing::debug!(subscription_id = %id, "Dropping push for unknown subscription");
            }
        }
    }

    async fn add(self: &Arc<Self>, sub: &Subscription) -> Result<String> {
        // A handle with an id is live, either here or in another manager.
        if let Some(id) = sub.id() {
            return Err(Error::DuplicateSubscription(id));
        }

        let provider = self
            .manager
            .provider()
            .await
            .ok_or(Error::ProviderNotAvailable)?;
        if !provider.supports_subscriptions() {
            return Err(Error::SubscriptionsNotSupported);
        }
        self.attach(Some(&provider));

        let id = sub.subscribe_with(&self.manager).await?;

        let duplicate = {
            let mut subs = self.subs();
            match subs.get(&id) {
                Some(existing) if !existing.sub.same_as(sub) => true,
                _ => {
                    let tracked = Tracked {
                        sub: sub.clone(),
                        provider,
                    };
                    subs.insert(id.clone(), tracked);
                    false
                }
            }
        };
        if duplicate {
            // The node handed out an id another entry already owns; that
            // entry keeps it.
            tracing::warn!(subscription_id = %id, "Subscription id already tracked");
            sub.clear_id();
            return Err(Error::DuplicateSubscription(id));
        }

        if let Some(m) = self.manager.metrics() {
            m.record_subscription_added(sub.type_name());
        }
        tracing::info!(
            subscription_id = %id,
            subscription_type = %sub.type_name(),
            "Subscribed"
        );
        sub.mark_connected(&id);
        Ok(id)
    }

    async fn remove(&self, sub: &Subscription) -> Result<()> {
        let id = sub.id().ok_or(Error::SubscriptionNotSubscribed)?;

        let tracked = {
            let mut subs = self.subs();
            match subs.get(&id) {
                Some(existing) if existing.sub.same_as(sub) => subs.remove(&id).is_some(),
                _ => false,
            }
        };
        if !tracked {
            return Err(Error::SubscriptionNotFound(id));
        }

        if let Some(m) = self.manager.metrics() {
            m.record_subscription_removed(sub.type_name());
        }
        tracing::info!(subscription_id = %id, "Unsubscribing");
        sub.unsubscribe_with(&self.manager).await
    }

    async fn resubscribe(self: &Arc<Self>, subs: Vec<Subscription>) {
        if subs.is_empty() {
            return;
        }

        tracing::info!(count = subs.len(), "Re-establishing subscriptions");
        for sub in subs {
            if let Some(m) = self.manager.metrics() {
                m.record_subscription_removed(sub.type_name());
            }
            sub.mark_disconnected();

            if let Err(e) = self.add(&sub).await {
                tracing::warn!(
                    subscription_type = %sub.type_name(),
                    error = %e,
                    "Re-subscription failed"
                );
                sub.fail(e);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.watcher).take() {
            handle.abort();
        }
        if let Some(slot) = lock(&self.listener).take() {
            slot.provider.remove_listener(slot.id);
        }
    }
}

fn same_provider(a: &Arc<dyn SubscribableProvider>, b: &Arc<dyn SubscribableProvider>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Tracks subscriptions for one request manager
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create a manager with the default subscription types registered
    ///
    /// Must be called from within a Tokio runtime: a background task
    /// follows the request manager's provider changes.
    pub fn new(manager: RequestManager) -> Self {
        let mut events = manager.events();
        let inner = Arc::new(Inner {
            manager,
            types: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            watcher: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        });

        let this = Self { inner };
        this.register_type("logs", Logs);
        this.register_type("newHeads", NewHeads);
        this.register_type("newBlockHeaders", NewHeads);
        this.register_type("newPendingTransactions", NewPendingTransactions);
        this.register_type("syncing", Syncing);

        let weak = Arc::downgrade(&this.inner);
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let ProviderEvent::ProviderChanged(provider) = event {
                    let inner = match weak.upgrade() {
                        Some(inner) => inner,
                        None => break,
                    };
                    inner.disconnected.store(false, Ordering::SeqCst);
                    inner.attach(provider.as_ref());
                    // Entries added after the change already live on the
                    // new provider.
                    let subs = inner.take_stale(provider.as_ref());
                    inner.resubscribe(subs).await;
                }
            }
        });
        *lock(&this.inner.watcher) = Some(watcher);

        this
    }

    pub fn request_manager(&self) -> &RequestManager {
        &self.inner.manager
    }

    /// Register (or replace) a subscription type under `name`
    pub fn register_type<T>(&self, name: impl Into<String>, kind: T)
    where
        T: SubscriptionType + 'static,
    {
        lock(&self.inner.types).insert(name.into(), Arc::new(kind));
    }

    /// Build an unsubscribed handle
    pub fn build(
        &self,
        type_name: &str,
        args: Value,
        callback: Option<SubscriptionCallback>,
    ) -> Result<Subscription> {
        let kind = lock(&self.inner.types)
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::InvalidSubscriptionType(type_name.to_string()))?;
        Ok(Subscription::new(type_name, kind, args, callback))
    }

    /// Build a subscription and subscribe it
    #[tracing::instrument(skip(self, args, callback))]
    pub async fn subscribe(
        &self,
        type_name: &str,
        args: Value,
        callback: Option<SubscriptionCallback>,
    ) -> Result<Subscription> {
        let provider = self
            .inner
            .manager
            .provider()
            .await
            .ok_or(Error::ProviderNotAvailable)?;
        if !provider.supports_subscriptions() {
            return Err(Error::SubscriptionsNotSupported);
        }

        let sub = self.build(type_name, args, callback)?;
        self.inner.add(&sub).await?;
        Ok(sub)
    }

    /// Subscribe `sub` and start tracking it under its new id
    pub async fn add_subscription(&self, sub: &Subscription) -> Result<String> {
        self.inner.add(sub).await
    }

    /// Unsubscribe `sub` and stop tracking it
    pub async fn remove_subscription(&self, sub: &Subscription) -> Result<()> {
        self.inner.remove(sub).await
    }

    /// Unsubscribe every tracked subscription
    ///
    /// Every subscription is removed even when some unsubscribe calls fail;
    /// the first failure is returned.
    pub async fn clear(&self) -> Result<()> {
        let subs: Vec<Subscription> = self.inner.subs().drain().map(|(_, t)| t.sub).collect();
        let mut first_error = None;

        for sub in subs {
            if let Some(m) = self.inner.manager.metrics() {
                m.record_subscription_removed(sub.type_name());
            }
            if let Err(e) = sub.unsubscribe_with(&self.inner.manager).await {
                tracing::warn!(error = %e, "Unsubscribe failed during clear");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The subscription tracked under `id`
    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.inner.subs().get(id).map(|t| t.sub.clone())
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subs().values().map(|t| t.sub.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.subs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.len())
            .finish()
    }
}
