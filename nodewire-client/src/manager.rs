//! Request manager
//!
//! [`RequestManager`] owns the current provider and turns caller-side
//! [`RpcCall`]s into JSON-RPC envelopes, dispatches them through the
//! provider adapter and interprets what comes back:
//!
//! 1. no provider set: [`Error::ProviderNotAvailable`]
//! 2. provider resolved with nothing: [`Error::InvalidResponse`], except for
//!    EIP-1193 providers where nothing is a `null` result
//! 3. RPC error object: a typed [`Error::Rpc`] in strict mode, an
//!    [`Error::InvalidResponse`] carrying the same cause in permissive mode
//! 4. otherwise the envelope's `result`
//!
//! # Provider changes
//!
//! Every [`set_provider`](RequestManager::set_provider) emits
//! [`ProviderEvent::BeforeProviderChange`] then
//! [`ProviderEvent::ProviderChanged`]. Calls already in flight keep the
//! provider they started with.
//!
//! # Cloning
//!
//! `RequestManager` is cheaply cloneable; all clones share the provider,
//! the id counter and the polling tasks. Polling tasks stop when the last
//! clone is dropped.

use crate::adapter::{Provider, ProviderKind};
use crate::batch::BatchRequest;
use crate::metrics::ClientMetrics;
use crate::provider::ProviderCapabilities;
use crate::transport::TransportConfig;
use nodewire_core::{
    codec, deferred, Error, EventChannel, EventStream, Evented, Id, JsonRpcErrorData,
    JsonRpcRequest, Result, RpcCall, RpcError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default deadline for batch execution
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Request manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Map RPC error codes to typed errors (default) instead of collapsing
    /// them into `InvalidResponse`
    pub strict_errors: bool,
    pub batch_timeout: Duration,
    /// Used when a provider is set from a string
    pub transport: TransportConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            strict_errors: true,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            transport: TransportConfig::default(),
        }
    }
}

/// What to install with [`RequestManager::set_provider`]
pub enum ProviderSource {
    /// A provider string; detection picks the built-in transport
    Url(String),
    /// An already classified provider
    Provider(Provider),
    /// An object to classify by capability probing
    Object(Arc<dyn ProviderCapabilities>),
    /// Remove the current provider
    Unset,
}

impl From<&str> for ProviderSource {
    fn from(url: &str) -> Self {
        ProviderSource::Url(url.to_string())
    }
}

impl From<String> for ProviderSource {
    fn from(url: String) -> Self {
        ProviderSource::Url(url)
    }
}

impl From<Provider> for ProviderSource {
    fn from(provider: Provider) -> Self {
        ProviderSource::Provider(provider)
    }
}

impl From<Option<Provider>> for ProviderSource {
    fn from(provider: Option<Provider>) -> Self {
        match provider {
            Some(p) => ProviderSource::Provider(p),
            None => ProviderSource::Unset,
        }
    }
}

impl From<Arc<dyn ProviderCapabilities>> for ProviderSource {
    fn from(object: Arc<dyn ProviderCapabilities>) -> Self {
        ProviderSource::Object(object)
    }
}

/// Provider lifecycle events
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Emitted before the swap with the outgoing provider
    BeforeProviderChange(Option<Provider>),
    /// Emitted after the swap with the incoming provider
    ProviderChanged(Option<Provider>),
}

/// Progress of a call made with [`RequestManager::send_with_events`]
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// The envelope is built and about to be dispatched
    Sending(JsonRpcRequest),
    /// The payload was handed to the provider
    Sent(JsonRpcRequest),
    /// The call succeeded with this result
    Response(Value),
    /// The call failed
    Error(Error),
}

/// Handle of a polling task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(u64);

struct ManagerInner {
    provider: RwLock<Option<Provider>>,
    next_id: AtomicU64,
    config: ManagerConfig,
    events: EventChannel<ProviderEvent>,
    polls: Mutex<HashMap<PollId, JoinHandle<()>>>,
    next_poll: AtomicU64,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ManagerInner {
    fn polls(&self) -> std::sync::MutexGuard<'_, HashMap<PollId, JoinHandle<()>>> {
        match self.polls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for (_, handle) in self.polls().drain() {
            handle.abort();
        }
    }
}

/// Dispatches JSON-RPC calls through the current provider
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManager {
    /// A manager with no provider and default settings
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::from_parts(config, None)
    }

    pub(crate) fn from_parts(config: ManagerConfig, metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                provider: RwLock::new(None),
                next_id: AtomicU64::new(1),
                config,
                events: EventChannel::new(),
                polls: Mutex::new(HashMap::new()),
                next_poll: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<ClientMetrics>> {
        self.inner.metrics.as_ref()
    }

    /// Next request id from the monotonic counter
    pub fn next_id(&self) -> Id {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Id::Number(n as i64)
    }

    /// Build the wire request for a call, assigning an id when it has none
    pub fn prepare(&self, call: RpcCall) -> JsonRpcRequest {
        call.into_request(|| self.next_id())
    }

    /// The current provider, if any
    pub async fn provider(&self) -> Option<Provider> {
        self.inner.provider.read().await.clone()
    }

    /// Listen for provider changes
    pub fn events(&self) -> EventStream<ProviderEvent> {
        self.inner.events.subscribe()
    }

    /// Install, replace or remove the provider
    ///
    /// The source is resolved before anything changes, so a detection
    /// failure leaves the current provider in place and emits nothing.
    #[tracing::instrument(skip(self, source))]
    pub async fn set_provider(&self, source: impl Into<ProviderSource>) -> Result<()> {
        let next = match source.into() {
            ProviderSource::Url(url) => {
                Some(Provider::from_url(&url, &self.inner.config.transport)?)
            }
            ProviderSource::Provider(provider) => Some(provider),
            ProviderSource::Object(object) => Some(Provider::detect(object)?),
            ProviderSource::Unset => None,
        };

        let mut slot = self.inner.provider.write().await;
        self.inner
            .events
            .emit(ProviderEvent::BeforeProviderChange(slot.clone()));
        *slot = next.clone();
        drop(slot);

        match next {
            Some(ref provider) => tracing::info!(kind = %provider.kind(), "Provider set"),
            None => tracing::info!("Provider cleared"),
        }
        self.inner.events.emit(ProviderEvent::ProviderChanged(next));
        Ok(())
    }

    /// Send one call and return its result
    #[tracing::instrument(skip(self, call), fields(method = %call.method))]
    pub async fn send(&self, call: RpcCall) -> Result<Value> {
        let request = self.prepare(call);
        self.dispatch(request, None).await
    }

    /// Send an already built request
    pub async fn send_request(&self, request: JsonRpcRequest) -> Result<Value> {
        self.dispatch(request, None).await
    }

    /// Send an array payload and return the raw answer
    ///
    /// Entries are not reconciled with the requests; see
    /// [`BatchRequest`] for that.
    #[tracing::instrument(skip(self, requests), fields(batch_size = requests.len()))]
    pub async fn send_batch(&self, requests: Vec<JsonRpcRequest>) -> Result<Value> {
        let provider = self.provider().await.ok_or(Error::ProviderNotAvailable)?;
        let payload = codec::to_batch_payload(&requests)?;

        if let Some(m) = self.metrics() {
            m.record_batch(requests.len() as u64);
        }

        match provider.call(payload).await? {
            Some(value) => Ok(value),
            None => Err(Error::invalid_response(
                "provider returned no batch response",
            )),
        }
    }

    /// Start an empty batch bound to this manager
    pub fn batch(&self) -> BatchRequest {
        BatchRequest::new(self.clone())
    }

    /// Send a call and observe its progress
    ///
    /// The returned future settles with the same outcome `send` would give;
    /// the event stream reports `Sending`, `Sent`, then `Response` or
    /// `Error`. Must be called from within a Tokio runtime.
    pub fn send_with_events(&self, call: RpcCall) -> Evented<Value, RequestEvent> {
        let request = self.prepare(call);
        let events = EventChannel::new();
        let stream = events.subscribe();
        let (resolver, result) = deferred();
        let manager = self.clone();

        tokio::spawn(async move {
            let outcome = manager.dispatch(request, Some(&events)).await;
            match outcome {
                Ok(ref value) => events.emit(RequestEvent::Response(value.clone())),
                Err(ref e) => events.emit(RequestEvent::Error(e.clone())),
            }
            resolver.settle(outcome);
        });

        Evented::new(result, stream)
    }

    /// Send `call` every `interval` and hand each outcome to `callback`
    ///
    /// The first send happens immediately. Each round draws a fresh id
    /// unless the call carries one. The task runs until
    /// [`stop_polling`](Self::stop_polling) or until the last manager clone
    /// is dropped.
    pub fn start_polling<F>(&self, call: RpcCall, interval: Duration, callback: F) -> PollId
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        let id = PollId(self.inner.next_poll.fetch_add(1, Ordering::Relaxed));
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let manager = match weak.upgrade() {
                    Some(inner) => RequestManager { inner },
                    None => break,
                };
                let outcome = manager.send(call.clone()).await;
                drop(manager);
                callback(outcome);
            }
        });

        tracing::debug!(poll_id = id.0, interval_ms = period.as_millis() as u64, "Polling started");
        self.inner.polls().insert(id, handle);
        id
    }

    /// Cancel a polling task. Returns false for an unknown id.
    pub fn stop_polling(&self, id: PollId) -> bool {
        match self.inner.polls().remove(&id) {
            Some(handle) => {
                handle.abort();
                tracing::debug!(poll_id = id.0, "Polling stopped");
                true
            }
            None => false,
        }
    }

    /// Number of running polling tasks
    pub fn polling_count(&self) -> usize {
        self.inner.polls().len()
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        events: Option<&EventChannel<RequestEvent>>,
    ) -> Result<Value> {
        if let Some(events) = events {
            events.emit(RequestEvent::Sending(request.clone()));
        }

        let provider = self.provider().await.ok_or(Error::ProviderNotAvailable)?;
        let payload = codec::to_payload(&request)?;

        if let Some(events) = events {
            events.emit(RequestEvent::Sent(request.clone()));
        }
        tracing::debug!(id = %request.id, "Request dispatched");

        let start = Instant::now();
        let outcome = provider.call(payload).await;
        let result = self.interpret(provider.kind(), outcome);
        let duration = start.elapsed().as_secs_f64();

        if let Some(m) = self.metrics() {
            match result {
                Ok(_) => m.record_request(&request.method, "success", duration),
                Err(ref e) => {
                    m.record_request(&request.method, "error", duration);
                    m.record_error(error_label(e));
                }
            }
        }

        match result {
            Ok(_) => {
                tracing::debug!(id = %request.id, duration_secs = duration, "Request completed")
            }
            Err(ref e) => tracing::debug!(id = %request.id, error = %e, "Request failed"),
        }
        result
    }

    fn interpret(&self, kind: ProviderKind, outcome: Result<Option<Value>>) -> Result<Value> {
        let value = match outcome {
            Ok(Some(value)) => value,
            Ok(None) => {
                return Err(Error::invalid_response("provider returned no response"))
            }
            Err(Error::JsonRpc(data)) => return Err(self.map_rpc_error(data)),
            Err(e) => return Err(e),
        };

        if !codec::is_response_envelope(&value) {
            // EIP-1193 providers hand back the bare result.
            return match kind {
                ProviderKind::Eip1193 => Ok(value),
                _ => Err(Error::invalid_response(format!(
                    "not a JSON-RPC response: {}",
                    value
                ))),
            };
        }

        let response = codec::decode_response(value)?;
        if let Some(error) = response.error {
            return Err(self.map_rpc_error(error));
        }
        response
            .result
            .ok_or_else(|| Error::invalid_response("response carries no result"))
    }

    fn map_rpc_error(&self, data: JsonRpcErrorData) -> Error {
        if self.inner.config.strict_errors {
            Error::Rpc(RpcError::new(data))
        } else {
            Error::InvalidResponse {
                reason: data.message.clone(),
                cause: Some(data),
            }
        }
    }
}

fn error_label(error: &Error) -> &'static str {
    match error {
        Error::Rpc(e) => e.kind.as_str(),
        Error::JsonRpc(_) => "json_rpc",
        Error::InvalidResponse { .. } => "invalid_response",
        Error::ProviderNotAvailable => "provider_not_available",
        Error::ConnectionClosed => "connection_closed",
        Error::Http(_) | Error::WebSocket(_) | Error::Io(_) => "transport",
        _ => "other",
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
