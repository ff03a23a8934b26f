//! Client metrics
//!
//! OpenTelemetry instruments recorded by the request manager, batch
//! executor, socket transports and subscription manager. Instruments are
//! created from the global meter provider; without
//! [`init_observability`](nodewire_core::init_observability) they are no-ops.
//!
//! - `nodewire.client.requests.total` / `nodewire.client.request.duration`
//! - `nodewire.client.errors.total`
//! - `nodewire.client.batch.size`
//! - `nodewire.client.notifications.received`
//! - `nodewire.client.subscriptions.active`
//! - `nodewire.client.connection.state`
//! - `nodewire.client.reconnection.attempts` / `nodewire.client.reconnection.success`

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
    KeyValue,
};

/// Instruments for one client
pub struct ClientMetrics {
    pub requests_total: Counter<u64>,
    /// Seconds
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub batch_size: Histogram<u64>,
    pub notifications_received: Counter<u64>,
    pub active_subscriptions: UpDownCounter<i64>,
    /// See [`ConnectionState::as_metric`]
    pub connection_state: Gauge<i64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        Self::with_meter(&global::meter(name))
    }

    pub fn with_meter(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("nodewire.client.requests.total")
                .with_description("Total number of requests dispatched to a provider")
                .build(),
            request_duration: meter
                .f64_histogram("nodewire.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .build(),
            errors_total: meter
                .u64_counter("nodewire.client.errors.total")
                .with_description("Total number of errors by kind")
                .build(),
            batch_size: meter
                .u64_histogram("nodewire.client.batch.size")
                .with_description("Number of calls per executed batch")
                .build(),
            notifications_received: meter
                .u64_counter("nodewire.client.notifications.received")
                .with_description("Total number of server push messages received")
                .build(),
            active_subscriptions: meter
                .i64_up_down_counter("nodewire.client.subscriptions.active")
                .with_description("Number of live subscriptions")
                .build(),
            connection_state: meter
                .i64_gauge("nodewire.client.connection.state")
                .with_description(
                    "Socket state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)",
                )
                .build(),
            reconnection_attempts: meter
                .u64_counter("nodewire.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("nodewire.client.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
        }
    }

    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", kind.to_string())]);
    }

    pub fn record_batch(&self, size: u64) {
        self.batch_size.record(size, &[]);
    }

    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_subscription_added(&self, kind: &str) {
        self.active_subscriptions
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_subscription_removed(&self, kind: &str) {
        self.active_subscriptions
            .add(-1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_connection_state(&self, endpoint: &str, state: &ConnectionState) {
        self.connection_state.record(
            state.as_metric(),
            &[KeyValue::new("endpoint", endpoint.to_string())],
        );
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_provider() {
        let metrics = ClientMetrics::new("test-client");

        metrics.record_request("eth_blockNumber", "success", 0.05);
        metrics.record_request("eth_call", "error", 0.01);
        metrics.record_error("rpc");
        metrics.record_batch(5);
        metrics.record_notification("eth_subscription");
        metrics.record_subscription_added("newHeads");
        metrics.record_subscription_removed("newHeads");
    }

    #[test]
    fn test_connection_metrics() {
        let metrics = ClientMetrics::new("test-client-socket");

        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Failed,
        ] {
            metrics.record_connection_state("ws://localhost:8546", &state);
        }
        metrics.record_reconnection_attempt();
        metrics.record_reconnection_success();
    }
}
