//! Builder for a configured request manager
//!
//! `RequestManagerBuilder` collects the provider source and every setting
//! that has to be known before the first request:
//! - strict or permissive RPC error mapping
//! - batch and HTTP timeouts
//! - the reconnection strategy for socket transports
//! - observability (OpenTelemetry) and the service name
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodewire_client::{ExponentialBackoff, RequestManagerBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> nodewire_core::Result<()> {
//! let manager = RequestManagerBuilder::new()
//!     .with_provider("ws://localhost:8546")
//!     .with_reconnect(ExponentialBackoff::default())
//!     .batch_timeout(Duration::from_secs(5))
//!     .build()
//!     .await?;
//!
//! let http = RequestManagerBuilder::new()
//!     .with_provider("https://rpc.example.org")
//!     .permissive_errors()
//!     .with_default_observability()
//!     .service_name("indexer")
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::manager::{ManagerConfig, ProviderSource, RequestManager};
use crate::metrics::ClientMetrics;
use crate::reconnect::{strategy_factory, NoReconnect, ReconnectionStrategy};
use nodewire_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`RequestManager`]
pub struct RequestManagerBuilder {
    provider: ProviderSource,
    config: ManagerConfig,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl Default for RequestManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManagerBuilder {
    pub fn new() -> Self {
        Self {
            provider: ProviderSource::Unset,
            config: ManagerConfig::default(),
            observability_config: None,
            service_name: None,
        }
    }

    /// Provider to install on build: a provider string, a [`Provider`](crate::Provider)
    /// or an object to classify
    pub fn with_provider(mut self, source: impl Into<ProviderSource>) -> Self {
        self.provider = source.into();
        self
    }

    /// Map RPC error codes to typed errors (default)
    pub fn strict_errors(mut self) -> Self {
        self.config.strict_errors = true;
        self
    }

    /// Report RPC errors as `InvalidResponse` carrying the wire error
    pub fn permissive_errors(mut self) -> Self {
        self.config.strict_errors = false;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_timeout = timeout;
        self
    }

    /// Timeout of each HTTP request made by a provider built from a string
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.http.request_timeout = timeout;
        self
    }

    /// Header sent with every HTTP request
    pub fn http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.transport.http.headers.push((name.into(), value.into()));
        self
    }

    /// Reconnection strategy for socket transports built from a string
    pub fn with_reconnect<S>(mut self, strategy: S) -> Self
    where
        S: ReconnectionStrategy + Clone + 'static,
    {
        self.config.transport.socket.reconnect = strategy_factory(strategy);
        self
    }

    /// Fail socket transports on the first disconnect
    pub fn without_reconnect(self) -> Self {
        self.with_reconnect(NoReconnect)
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build the manager and install the provider
    pub async fn build(self) -> Result<RequestManager> {
        let mut config = self.config;

        let metrics = if let Some(mut obs) = self.observability_config {
            if let Some(name) = self.service_name {
                obs.service_name = name;
            }

            nodewire_core::init_observability(obs.clone()).map_err(|e| {
                Error::Internal(format!("Failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(ClientMetrics::new(obs.service_name.clone())))
        } else {
            None
        };
        config.transport.socket.metrics = metrics.clone();

        let manager = RequestManager::from_parts(config, metrics);
        if !matches!(self.provider, ProviderSource::Unset) {
            manager.set_provider(self.provider).await?;
        }
        Ok(manager)
    }
}

impl std::fmt::Debug for RequestManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManagerBuilder")
            .field("config", &self.config)
            .field("observability", &self.observability_config.is_some())
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}
