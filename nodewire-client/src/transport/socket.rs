//! Connection task shared by the socket transports
//!
//! A [`SocketClient`] owns one background task per endpoint. The task opens
//! the connection through a [`Connector`], writes queued payloads, routes
//! response frames to their waiters and push frames to the listeners, and
//! reconnects according to the configured strategy when the connection
//! drops.
//!
//! Payloads sent while the socket is down are queued and written once the
//! connection is back. Requests that were in flight when it dropped fail
//! with [`Error::ConnectionClosed`]. A queued payload whose caller already
//! gave up, or already saw that error, is never written.

use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::metrics::ClientMetrics;
use crate::pending::{PendingRequests, Ticket};
use crate::provider::{Listener, ListenerId, ListenerRegistry, ProviderMessage};
use crate::transport::SocketConfig;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use nodewire_core::{codec, Error, Result};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Outgoing half of a connection: one encoded payload per item
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Incoming half of a connection: one parsed JSON frame per item
///
/// An `Err` item or the end of the stream ends the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Opens framed connections to one endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;

    fn endpoint(&self) -> &str;
}

struct Shared {
    pending: PendingRequests,
    listeners: ListenerRegistry,
    connection: ConnectionManager,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Shared {
    fn dispatch(&self, frame: Value) {
        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            tracing::debug!(method = %method, "Push message received");
            if let Some(ref m) = self.metrics {
                m.record_notification(method);
            }
            self.listeners.emit(ProviderMessage::Message(frame));
            return;
        }

        if !self.pending.complete(frame) {
            tracing::debug!("Dropping response with no pending request");
        }
    }

    fn record_state(&self) {
        if let Some(ref m) = self.metrics {
            m.record_connection_state(self.connection.endpoint(), &self.connection.state());
        }
    }
}

/// A payload waiting for the writer, tagged with its waiter
struct Outgoing {
    ticket: Ticket,
    text: String,
}

/// Releases a registered waiter when the request future ends, including
/// when it is dropped before an answer arrives.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    ticket: Ticket,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.cancel(self.ticket) {
            tracing::debug!("Request abandoned before its response arrived");
        }
    }
}

enum PumpExit {
    Disconnected,
    Shutdown,
}

/// Handle to a socket connection task
pub struct SocketClient {
    commands: mpsc::UnboundedSender<Outgoing>,
    shutdown: watch::Sender<bool>,
    shared: Arc<Shared>,
}

impl SocketClient {
    /// Spawn the connection task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<C: Connector>(connector: C, config: SocketConfig) -> Self {
        let shared = Arc::new(Shared {
            pending: PendingRequests::new(),
            listeners: ListenerRegistry::new(),
            connection: ConnectionManager::new(connector.endpoint(), (config.reconnect)()),
            metrics: config.metrics,
        });
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(run(connector, shared.clone(), commands_rx, shutdown_rx));

        Self {
            commands,
            shutdown,
            shared,
        }
    }

    /// Send a request or batch payload and wait for the frame answering it
    pub async fn request(&self, payload: Value) -> Result<Option<Value>> {
        let ids = codec::payload_ids(&payload);
        let text = codec::encode(&payload)?;
        let (ticket, rx) = self.shared.pending.register(&ids)?;
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            ticket,
        };

        if self.commands.send(Outgoing { ticket, text }).is_err() {
            return Err(Error::ConnectionClosed);
        }

        match rx.await {
            Ok(outcome) => outcome.map(Some),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    pub fn on(&self, listener: Listener) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.watch()
    }

    pub fn endpoint(&self) -> &str {
        self.shared.connection.endpoint()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.pending_count()
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run<C: Connector>(
    connector: C,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    mut shutdown: watch::Receiver<bool>,
) {
    let endpoint = connector.endpoint().to_string();
    let mut reconnecting = false;

    loop {
        if !reconnecting {
            shared.connection.connecting();
            shared.record_state();
        }

        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok((sink, stream)) => {
                shared.connection.connected();
                shared.record_state();
                if reconnecting {
                    tracing::info!(url = %endpoint, "Reconnected successfully");
                    if let Some(ref m) = shared.metrics {
                        m.record_reconnection_success();
                    }
                } else {
                    tracing::info!(url = %endpoint, "Connected");
                }
                shared.listeners.emit(ProviderMessage::Connected);

                let exit = pump(&shared, sink, stream, &mut commands, &mut shutdown).await;
                if let PumpExit::Shutdown = exit {
                    break;
                }

                shared.connection.disconnected();
                // Payloads still queued for these waiters are skipped by the
                // writer once their tickets are gone.
                shared.pending.fail_all(Error::ConnectionClosed);
                shared.listeners.emit(ProviderMessage::Disconnected);
                shared.connection.start_reconnecting();
                shared.record_state();
            }
            Err(e) => {
                tracing::warn!(url = %endpoint, error = %e, "Connection attempt failed");
                if let Some(ref m) = shared.metrics {
                    m.record_error("connect");
                }
                if !reconnecting {
                    shared.connection.start_reconnecting();
                }
            }
        }
        reconnecting = true;

        match shared.connection.next_reconnect_delay() {
            Some(delay) => {
                let attempt = match shared.connection.state() {
                    ConnectionState::Reconnecting { attempt } => attempt,
                    _ => 0,
                };
                tracing::info!(
                    url = %endpoint,
                    delay_secs = delay.as_secs_f64(),
                    attempt = attempt,
                    "Reconnecting"
                );
                if let Some(ref m) = shared.metrics {
                    m.record_reconnection_attempt();
                }
                shared.record_state();

                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tracing::error!(url = %endpoint, "Reconnection abandoned (max attempts reached)");
                shared.record_state();
                break;
            }
        }
    }

    // Refuse new payloads before failing the waiters, so nothing can slip
    // into the queue unanswered.
    commands.close();
    shared.pending.fail_all(Error::ConnectionClosed);
    if shared.connection.state() != ConnectionState::Failed {
        shared.connection.disconnected();
        shared.record_state();
    }
    tracing::debug!(url = %endpoint, "Connection task finished");
}

async fn pump(
    shared: &Shared,
    mut sink: FrameSink,
    mut stream: FrameStream,
    commands: &mut mpsc::UnboundedReceiver<Outgoing>,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return PumpExit::Shutdown;
            }
            command = commands.recv() => match command {
                Some(outgoing) if !shared.pending.is_pending(outgoing.ticket) => {
                    tracing::debug!("Skipping payload of a settled request");
                }
                Some(outgoing) => {
                    if let Err(e) = sink.send(outgoing.text).await {
                        tracing::warn!(error = %e, "Failed to write payload");
                        return PumpExit::Disconnected;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return PumpExit::Shutdown;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(value)) => shared.dispatch(value),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Connection error");
                    if let Some(ref m) = shared.metrics {
                        m.record_error("socket");
                    }
                    return PumpExit::Disconnected;
                }
                None => {
                    tracing::info!("Connection closed by peer");
                    return PumpExit::Disconnected;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{strategy_factory, FixedDelay, NoReconnect};
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type ServerSide = (fmpsc::UnboundedReceiver<String>, fmpsc::UnboundedSender<Result<Value>>);

    /// In-memory connector; every successful connect hands the server side
    /// of the new connection to the test.
    struct ChannelConnector {
        server: Mutex<Option<fmpsc::UnboundedSender<ServerSide>>>,
        failures_left: AtomicUsize,
    }

    impl ChannelConnector {
        fn new(failures: usize) -> (Self, fmpsc::UnboundedReceiver<ServerSide>) {
            let (tx, rx) = fmpsc::unbounded();
            (
                Self {
                    server: Mutex::new(Some(tx)),
                    failures_left: AtomicUsize::new(failures),
                },
                rx,
            )
        }
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Io("connection refused".into()));
            }

            let (out_tx, out_rx) = fmpsc::unbounded::<String>();
            let (in_tx, in_rx) = fmpsc::unbounded::<Result<Value>>();
            let server = self.server.lock().unwrap().clone().unwrap();
            server.unbounded_send((out_rx, in_tx)).unwrap();

            let sink: FrameSink =
                Box::pin(out_tx.sink_map_err(|e| Error::WebSocket(e.to_string())));
            Ok((sink, Box::pin(in_rx)))
        }

        fn endpoint(&self) -> &str {
            "mem://node"
        }
    }

    fn config(strategy: crate::reconnect::StrategyFactory) -> SocketConfig {
        SocketConfig {
            reconnect: strategy,
            metrics: None,
        }
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (connector, mut servers) = ChannelConnector::new(0);
        let client = SocketClient::spawn(connector, config(strategy_factory(NoReconnect)));

        tokio::spawn(async move {
            let (mut rx, tx) = servers.next().await.unwrap();
            while let Some(text) = rx.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                tx.unbounded_send(Ok(json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x1"})))
                    .unwrap();
            }
        });

        let response = client
            .request(json!({"jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": []}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["result"], "0x1");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_push_frames_reach_listeners() {
        let (connector, mut servers) = ChannelConnector::new(0);
        let client = SocketClient::spawn(connector, config(strategy_factory(NoReconnect)));

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        client.on(Arc::new(move |msg| {
            let _ = seen_tx.send(msg);
        }));

        let (_rx, tx) = servers.next().await.unwrap();
        let push = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": "0xabc", "result": 1}
        });
        tx.unbounded_send(Ok(push.clone())).unwrap();

        loop {
            match seen_rx.recv().await.unwrap() {
                ProviderMessage::Message(value) => {
                    assert_eq!(value, push);
                    break;
                }
                ProviderMessage::Connected => continue,
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_in_flight_request_fails_on_disconnect() {
        let (connector, mut servers) = ChannelConnector::new(0);
        let client = SocketClient::spawn(connector, config(strategy_factory(NoReconnect)));

        let server = tokio::spawn(async move {
            let (mut rx, tx) = servers.next().await.unwrap();
            // Read the request, then drop the connection without answering.
            rx.next().await.unwrap();
            drop(tx);
        });

        let err = client
            .request(json!({"jsonrpc": "2.0", "id": 5, "method": "eth_blockNumber", "params": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_failed_attempts() {
        let (connector, mut servers) = ChannelConnector::new(2);
        let client = SocketClient::spawn(
            connector,
            config(strategy_factory(
                FixedDelay::new(Duration::from_millis(20)).with_max_attempts(5),
            )),
        );

        let _server = servers.next().await.unwrap();
        let mut state = client.watch_state();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.is_connected()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_request_releases_its_id() {
        let (connector, mut servers) = ChannelConnector::new(0);
        let client = SocketClient::spawn(connector, config(strategy_factory(NoReconnect)));

        tokio::spawn(async move {
            let (mut rx, tx) = servers.next().await.unwrap();
            // The first request is never answered.
            rx.next().await.unwrap();
            while let Some(text) = rx.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                tx.unbounded_send(Ok(json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x1"})))
                    .unwrap();
            }
        });

        let payload = json!({"jsonrpc": "2.0", "id": "fixed", "method": "eth_chainId", "params": []});
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), client.request(payload.clone())).await;
        assert!(outcome.is_err());
        assert_eq!(client.pending_count(), 0);

        let response = client.request(payload).await.unwrap().unwrap();
        assert_eq!(response["id"], "fixed");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_payload_is_not_written_after_reconnect() {
        let (connector, mut servers) = ChannelConnector::new(0);
        let client = SocketClient::spawn(
            connector,
            config(strategy_factory(
                FixedDelay::new(Duration::from_millis(200)).with_max_attempts(5),
            )),
        );

        // Drop the first connection straight away.
        drop(servers.next().await.unwrap());
        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        // Queued while down, then given up on.
        let abandoned = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_sendRawTransaction", "params": ["0x00"]});
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), client.request(abandoned)).await;
        assert!(outcome.is_err());

        let server = tokio::spawn(async move {
            let (mut rx, tx) = servers.next().await.unwrap();
            let text = rx.next().await.unwrap();
            let req: Value = serde_json::from_str(&text).unwrap();
            tx.unbounded_send(Ok(json!({"jsonrpc": "2.0", "id": req["id"], "result": "0x1"})))
                .unwrap();
            req
        });

        let response = client
            .request(json!({"jsonrpc": "2.0", "id": 2, "method": "eth_chainId", "params": []}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["id"], 2);

        let first_written = server.await.unwrap();
        assert_eq!(first_written["method"], "eth_chainId");
    }

    #[tokio::test]
    async fn test_gives_up_and_rejects_requests() {
        let (connector, _servers) = ChannelConnector::new(usize::MAX);
        let client = SocketClient::spawn(connector, config(strategy_factory(NoReconnect)));

        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Failed),
        )
        .await
        .unwrap()
        .unwrap();

        // Give the task a moment to close its queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = client
            .request(json!({"jsonrpc": "2.0", "id": 1, "method": "net_version", "params": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
