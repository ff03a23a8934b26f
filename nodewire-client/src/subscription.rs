//! Subscriptions and subscription types
//!
//! A [`SubscriptionType`] describes how one kind of server push is set up:
//! which method subscribes, how the caller's arguments become parameters
//! and how pushed values are formatted. A [`Subscription`] is a cloneable
//! handle to one live (or not yet live) instance of a type.
//!
//! Handles report every delivery twice: through the optional callback
//! (`Ok(value)` / `Err(error)`) and through the typed event stream from
//! [`Subscription::events`].

use crate::manager::RequestManager;
use nodewire_core::{Error, EventChannel, EventStream, Result, RpcCall};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Describes one kind of server push subscription
pub trait SubscriptionType: Send + Sync {
    /// Name passed as the first subscribe parameter
    fn name(&self) -> &str;

    fn subscribe_method(&self) -> &str {
        "eth_subscribe"
    }

    fn unsubscribe_method(&self) -> &str {
        "eth_unsubscribe"
    }

    /// Parameters of the subscribe call for the caller's arguments
    ///
    /// `args` is `Null` when the caller passed none.
    fn subscribe_params(&self, args: &Value) -> Result<Vec<Value>> {
        match args {
            Value::Null => Ok(vec![json!(self.name())]),
            other => Ok(vec![json!(self.name()), other.clone()]),
        }
    }

    /// Shape a pushed value before delivery
    fn format_output(&self, output: Value) -> Result<Value> {
        Ok(output)
    }
}

/// `logs`: takes an optional filter object
#[derive(Debug, Clone, Copy, Default)]
pub struct Logs;

impl SubscriptionType for Logs {
    fn name(&self) -> &str {
        "logs"
    }

    fn subscribe_params(&self, args: &Value) -> Result<Vec<Value>> {
        match args {
            Value::Null => Ok(vec![json!("logs")]),
            Value::Object(_) => Ok(vec![json!("logs"), args.clone()]),
            other => Err(Error::InvalidRequest(format!(
                "logs filter must be an object, got {}",
                other
            ))),
        }
    }
}

/// `newHeads`, also registered as `newBlockHeaders`
#[derive(Debug, Clone, Copy, Default)]
pub struct NewHeads;

impl SubscriptionType for NewHeads {
    fn name(&self) -> &str {
        "newHeads"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewPendingTransactions;

impl SubscriptionType for NewPendingTransactions {
    fn name(&self) -> &str {
        "newPendingTransactions"
    }
}

/// `syncing`: pushes are normalized to `{"syncing": bool, "status": ..}`
#[derive(Debug, Clone, Copy, Default)]
pub struct Syncing;

#[derive(Serialize)]
struct SyncState {
    syncing: bool,
    status: Option<Value>,
}

impl SubscriptionType for Syncing {
    fn name(&self) -> &str {
        "syncing"
    }

    fn format_output(&self, output: Value) -> Result<Value> {
        let state = match output {
            Value::Bool(syncing) => SyncState {
                syncing,
                status: None,
            },
            Value::Object(mut map) => match map.remove("syncing") {
                Some(Value::Bool(syncing)) => SyncState {
                    syncing,
                    status: map.remove("status").filter(|s| !s.is_null()),
                },
                Some(other) => {
                    return Err(Error::invalid_response(format!(
                        "syncing flag is not a boolean: {}",
                        other
                    )))
                }
                // A bare progress object means syncing is under way.
                None => SyncState {
                    syncing: true,
                    status: Some(Value::Object(map)),
                },
            },
            other => {
                return Err(Error::invalid_response(format!(
                    "unexpected syncing payload: {}",
                    other
                )))
            }
        };
        Ok(serde_json::to_value(state)?)
    }
}

/// Delivery callback of a subscription
pub type SubscriptionCallback = Arc<dyn Fn(Result<Value>) + Send + Sync>;

/// Lifecycle and data events of one subscription
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// Subscribed under this server-assigned id
    Connected(String),
    /// A pushed value, after formatting
    Data(Value),
    Error(Error),
    /// The subscription under this id ended
    Disconnected(String),
}

struct SubscriptionInner {
    type_name: String,
    kind: Arc<dyn SubscriptionType>,
    args: Value,
    id: Mutex<Option<String>>,
    callback: Option<SubscriptionCallback>,
    events: EventChannel<SubscriptionEvent>,
}

/// Handle to one subscription
///
/// The id is `None` until subscribing succeeds and again after
/// unsubscribing.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(
        type_name: impl Into<String>,
        kind: Arc<dyn SubscriptionType>,
        args: Value,
        callback: Option<SubscriptionCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                type_name: type_name.into(),
                kind,
                args,
                id: Mutex::new(None),
                callback,
                events: EventChannel::new(),
            }),
        }
    }

    /// Server-assigned id while active
    pub fn id(&self) -> Option<String> {
        self.slot().clone()
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Name the subscription was built under
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn args(&self) -> &Value {
        &self.inner.args
    }

    /// Listen for lifecycle and data events
    pub fn events(&self) -> EventStream<SubscriptionEvent> {
        self.inner.events.subscribe()
    }

    /// True when both handles refer to the same subscription
    pub fn same_as(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Issue the subscribe call and store the returned id
    pub(crate) async fn subscribe_with(&self, manager: &RequestManager) -> Result<String> {
        let kind = &self.inner.kind;
        let params = kind.subscribe_params(&self.inner.args)?;
        let call = RpcCall::new(kind.subscribe_method()).with_params(params);

        let id = match manager.send(call).await? {
            Value::String(id) => id,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(Error::invalid_response(format!(
                    "subscription id is not a string: {}",
                    other
                )))
            }
        };

        *self.slot() = Some(id.clone());
        Ok(id)
    }

    /// Issue the unsubscribe call; the id is reset whatever the outcome
    pub(crate) async fn unsubscribe_with(&self, manager: &RequestManager) -> Result<()> {
        let id = self.id().ok_or(Error::SubscriptionNotSubscribed)?;
        let call = RpcCall::new(self.inner.kind.unsubscribe_method()).with_param(json!(id));
        let outcome = manager.send(call).await;

        self.mark_disconnected();
        outcome.map(|_| ())
    }

    pub(crate) fn mark_connected(&self, id: &str) {
        self.inner
            .events
            .emit(SubscriptionEvent::Connected(id.to_string()));
    }

    /// Reset the id, announcing the end of the old one
    pub(crate) fn mark_disconnected(&self) {
        let previous = self.slot().take();
        if let Some(id) = previous {
            self.inner.events.emit(SubscriptionEvent::Disconnected(id));
        }
    }

    /// Reset the id without announcing anything
    pub(crate) fn clear_id(&self) {
        self.slot().take();
    }

    /// Deliver a pushed value
    ///
    /// A formatter failure is logged and the raw value delivered instead.
    pub(crate) fn deliver(&self, payload: Value) {
        let output = match self.inner.kind.format_output(payload.clone()) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    subscription_type = %self.inner.type_name,
                    error = %e,
                    "Output formatter failed, delivering raw payload"
                );
                payload
            }
        };

        self.inner.events.emit(SubscriptionEvent::Data(output.clone()));
        if let Some(ref callback) = self.inner.callback {
            callback(Ok(output));
        }
    }

    /// Report a failure to the callback and the event stream
    pub(crate) fn fail(&self, error: Error) {
        self.inner.events.emit(SubscriptionEvent::Error(error.clone()));
        if let Some(ref callback) = self.inner.callback {
            callback(Err(error));
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.inner.id.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("type", &self.inner.type_name)
            .field("id", &self.id())
            .field("args", &self.inner.args)
            .finish()
    }
}
