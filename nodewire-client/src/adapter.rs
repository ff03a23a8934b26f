//! Provider adapter
//!
//! [`Provider`] is the closed set of calling conventions the request
//! manager can drive. Classification happens once, when the provider is
//! built or detected; every call afterwards dispatches on the variant and
//! hands back the transport's raw answer through one uniform
//! [`Provider::call`].
//!
//! The adapter never interprets what comes back. It only normalizes the
//! calling convention:
//!
//! - callback providers are bridged through a deferred that the callback
//!   settles exactly once
//! - an EIP-1193 provider answering with nothing is a `null` result; the
//!   other conventions pass the missing value through so the request
//!   manager can reject it

use crate::provider::{
    Eip1193Provider, LegacyAsyncProvider, LegacyCallbackProvider, ProviderCapabilities,
    SubscribableProvider,
};
use crate::transport::{HttpProvider, TransportConfig, WebSocketProvider};
use nodewire_core::{deferred, Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Calling convention of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Eip1193,
    LegacyCallback,
    LegacyAsync,
    Subscribable,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::Eip1193 => "EIP-1193",
            ProviderKind::LegacyCallback => "legacy callback",
            ProviderKind::LegacyAsync => "legacy async",
            ProviderKind::Subscribable => "subscribable",
        };
        f.write_str(name)
    }
}

/// Built-in transport selected from a provider string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    WebSocket,
    Ipc,
}

/// Pick a transport for a provider string
///
/// `http(s)://` selects HTTP, `ws(s)://` selects WebSocket, and `ipc://` or
/// any string without a scheme is an IPC socket path.
pub fn detect_url(provider: &str) -> Result<TransportKind> {
    let trimmed = provider.trim();
    if trimmed.is_empty() {
        return Err(Error::ProviderDetection(
            "provider string is empty".to_string(),
        ));
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(TransportKind::Http);
    }
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        return Ok(TransportKind::WebSocket);
    }
    if lower.starts_with("ipc://") {
        return Ok(TransportKind::Ipc);
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(Error::ProviderDetection(format!(
            "unsupported scheme \"{}\" in provider string {}",
            scheme, trimmed
        )));
    }

    Ok(TransportKind::Ipc)
}

/// A classified provider
#[derive(Clone)]
pub enum Provider {
    Eip1193(Arc<dyn Eip1193Provider>),
    LegacyCallback(Arc<dyn LegacyCallbackProvider>),
    LegacyAsync(Arc<dyn LegacyAsyncProvider>),
    Subscribable(Arc<dyn SubscribableProvider>),
}

impl Provider {
    /// Classify an object by probing its capabilities
    ///
    /// Probes run in priority order: subscribable, EIP-1193, legacy async,
    /// legacy callback. The first match wins.
    pub fn detect(object: Arc<dyn ProviderCapabilities>) -> Result<Self> {
        if let Some(p) = object.clone().as_subscribable() {
            return Ok(Provider::Subscribable(p));
        }
        if let Some(p) = object.clone().as_eip1193() {
            return Ok(Provider::Eip1193(p));
        }
        if let Some(p) = object.clone().as_legacy_async() {
            return Ok(Provider::LegacyAsync(p));
        }
        if let Some(p) = object.as_legacy_callback() {
            return Ok(Provider::LegacyCallback(p));
        }
        Err(Error::UnsupportedProvider(
            "object exposes none of request, send_async or send".to_string(),
        ))
    }

    /// Build the built-in transport matching a provider string
    ///
    /// Socket transports start connecting in the background; requests sent
    /// before the connection is up wait for it.
    pub fn from_url(url: &str, config: &TransportConfig) -> Result<Self> {
        let url = url.trim();
        match detect_url(url)? {
            TransportKind::Http => {
                let http = HttpProvider::new(url, config.http.clone())?;
                Ok(Provider::Eip1193(Arc::new(http)))
            }
            TransportKind::WebSocket => {
                let ws = WebSocketProvider::connect(url, config.socket.clone());
                Ok(Provider::Subscribable(Arc::new(ws)))
            }
            TransportKind::Ipc => Self::ipc(url, config),
        }
    }

    #[cfg(unix)]
    fn ipc(url: &str, config: &TransportConfig) -> Result<Self> {
        let path = strip_ipc_scheme(url);
        let ipc = crate::transport::IpcProvider::connect(path, config.socket.clone());
        Ok(Provider::Subscribable(Arc::new(ipc)))
    }

    #[cfg(not(unix))]
    fn ipc(url: &str, _config: &TransportConfig) -> Result<Self> {
        Err(Error::UnsupportedProvider(format!(
            "IPC transport is only available on unix platforms: {}",
            url
        )))
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Eip1193(_) => ProviderKind::Eip1193,
            Provider::LegacyCallback(_) => ProviderKind::LegacyCallback,
            Provider::LegacyAsync(_) => ProviderKind::LegacyAsync,
            Provider::Subscribable(_) => ProviderKind::Subscribable,
        }
    }

    pub fn supports_subscriptions(&self) -> bool {
        match self {
            Provider::Subscribable(p) => p.supports_subscriptions(),
            _ => false,
        }
    }

    pub fn as_subscribable(&self) -> Option<&Arc<dyn SubscribableProvider>> {
        match self {
            Provider::Subscribable(p) => Some(p),
            _ => None,
        }
    }

    /// Perform exactly one transport call
    pub async fn call(&self, payload: Value) -> Result<Option<Value>> {
        match self {
            Provider::Eip1193(p) => Ok(Some(p.request(payload).await?.unwrap_or(Value::Null))),
            Provider::LegacyAsync(p) => p.send_async(payload).await,
            Provider::Subscribable(p) => p.request(payload).await,
            Provider::LegacyCallback(p) => {
                let (resolver, settled) = deferred::<Option<Value>>();
                p.send(
                    payload,
                    Box::new(move |outcome| {
                        if !resolver.settle(outcome) {
                            tracing::debug!("Provider callback outcome discarded");
                        }
                    }),
                );
                settled.await
            }
        }
    }

    /// True when both handles drive the same underlying object
    pub fn same_as(&self, other: &Provider) -> bool {
        fn addr<T: ?Sized>(p: &Arc<T>) -> *const () {
            Arc::as_ptr(p) as *const ()
        }
        match (self, other) {
            (Provider::Eip1193(a), Provider::Eip1193(b)) => addr(a) == addr(b),
            (Provider::LegacyCallback(a), Provider::LegacyCallback(b)) => addr(a) == addr(b),
            (Provider::LegacyAsync(a), Provider::LegacyAsync(b)) => addr(a) == addr(b),
            (Provider::Subscribable(a), Provider::Subscribable(b)) => addr(a) == addr(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Provider").field(&self.kind()).finish()
    }
}

#[cfg(unix)]
fn strip_ipc_scheme(url: &str) -> &str {
    match url.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("ipc://") => &url[6..],
        _ => url,
    }
}
