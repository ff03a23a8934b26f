//! Common test utilities for nodewire-client integration tests
//!
//! Mock nodes for every transport plus in-process providers for each
//! calling convention, so client behavior can be tested without a real
//! node.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nodewire_client::{
    Eip1193Provider, LegacyAsyncProvider, LegacyCallbackProvider, Listener, ListenerId,
    ListenerRegistry, ProviderCallback, ProviderCapabilities, ProviderMessage,
    SubscribableProvider,
};
use nodewire_core::{Error, Result};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Answers one request (or batch) with zero or more frames
pub type FrameHandler = Arc<dyn Fn(Value) -> Vec<Value> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Kick,
}

/// Mock WebSocket node
///
/// Every text frame is parsed and handed to the handler; each value the
/// handler returns is written back as its own frame.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    message_rx: mpsc::UnboundedReceiver<String>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// A node answering with [`node_reply`]
    pub async fn new() -> Self {
        Self::with_handler(|request| vec![node_reply(&request)]).await
    }

    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    /// Restart on a fixed address, for reconnection tests
    pub async fn bind<F>(addr: SocketAddr, handler: F) -> Self
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    fn serve(listener: TcpListener, handler: FrameHandler) -> Self {
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (msg_tx, message_rx) = mpsc::unbounded_channel::<String>();
        let (control, _) = broadcast::channel::<Control>(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let control_tx = control.clone();
        let counter = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let (stream, _) = match accepted {
                            Ok(conn) => conn,
                            Err(_) => continue,
                        };
                        let handler = handler.clone();
                        let msg_tx = msg_tx.clone();
                        let mut control_rx = control_tx.subscribe();
                        let counter = counter.clone();

                        tokio::spawn(async move {
                            let ws_stream = match accept_async(stream).await {
                                Ok(ws) => ws,
                                Err(_) => return,
                            };
                            counter.fetch_add(1, Ordering::SeqCst);
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    incoming = read.next() => match incoming {
                                        Some(Ok(Message::Text(text))) => {
                                            let _ = msg_tx.send(text.clone());
                                            let request: Value = match serde_json::from_str(&text) {
                                                Ok(v) => v,
                                                Err(_) => continue,
                                            };
                                            for frame in handler(request) {
                                                if write.send(Message::Text(frame.to_string())).await.is_err() {
                                                    break;
                                                }
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                        Some(Ok(_)) => {}
                                    },
                                    control = control_rx.recv() => match control {
                                        Ok(Control::Push(text)) => {
                                            let _ = write.send(Message::Text(text)).await;
                                        }
                                        Ok(Control::Kick) | Err(broadcast::error::RecvError::Closed) => {
                                            let _ = write.close().await;
                                            break;
                                        }
                                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                                    },
                                }
                            }
                            counter.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            message_rx,
            control,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next text frame received from any client, or None after 5 seconds
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Write a frame to every open connection
    pub fn push(&self, frame: Value) {
        let _ = self.control.send(Control::Push(frame.to_string()));
    }

    /// Close every open connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Kick);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until `count` clients are connected
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count not reached");
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.control.send(Control::Kick);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Answers one request body with a status code and a response body
pub type HttpHandler = Arc<dyn Fn(Value) -> (u16, String) + Send + Sync>;

/// Mock HTTP node, one request per connection
pub struct MockHttpServer {
    addr: SocketAddr,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl MockHttpServer {
    /// A node answering with [`node_reply`]
    pub async fn new() -> Self {
        Self::with_handler(|request| (200, node_reply(&request).to_string())).await
    }

    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(Value) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: HttpHandler = Arc::new(handler);
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let seen = bodies.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve_http(stream, handler, seen).await;
                });
            }
        });

        Self { addr, bodies }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every request body received so far
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn serve_http(
    mut stream: TcpStream,
    handler: HttpHandler,
    seen: Arc<Mutex<Vec<Value>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body: Value = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    seen.lock().unwrap().push(body.clone());

    let (status, response) = handler(body);
    let reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status == 200 { "OK" } else { "Error" },
        response.len(),
        response
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

/// A well-behaved node: answers single requests and batches
///
/// - `eth_blockNumber` → `"0x10"`
/// - `eth_chainId` → `"0x1"`
/// - `net_version` → `"1"`
/// - `eth_subscribe` → `"sub-id"`
/// - `eth_unsubscribe` → `true`
/// - `echo` → its parameters
/// - anything else → `-32601`
pub fn node_reply(payload: &Value) -> Value {
    if let Value::Array(items) = payload {
        return Value::Array(items.iter().map(node_reply).collect());
    }

    let id = payload["id"].clone();
    let method = payload["method"].as_str().unwrap_or_default();
    let result = match method {
        "eth_blockNumber" => json!("0x10"),
        "eth_chainId" => json!("0x1"),
        "net_version" => json!("1"),
        "eth_subscribe" => json!("sub-id"),
        "eth_unsubscribe" => json!(true),
        "echo" => payload["params"].clone(),
        other => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("the method {} does not exist/is not available", other)
                }
            })
        }
    };
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Helper to create a mock JSON-RPC response
pub fn mock_response(id: i64, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "result": result, "id": id})
}

/// Helper to create a mock JSON-RPC error response
pub fn mock_error_response(id: i64, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id
    })
}

/// Helper to create an `eth_subscription` push
pub fn mock_notification(subscription: &str, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": subscription, "result": result}
    })
}

/// Computes a provider's answer to a payload
pub type ProviderHandler = Arc<dyn Fn(Value) -> Result<Option<Value>> + Send + Sync>;

fn handler<F>(f: F) -> ProviderHandler
where
    F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler backed by [`node_reply`]
pub fn node_handler() -> ProviderHandler {
    handler(|payload| Ok(Some(node_reply(&payload))))
}

/// EIP-1193 style provider
pub struct MockEip1193 {
    handler: ProviderHandler,
    pub calls: AtomicUsize,
}

impl MockEip1193 {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: handler(f),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Eip1193Provider for MockEip1193 {
    async fn request(&self, payload: Value) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(payload)
    }
}

impl ProviderCapabilities for MockEip1193 {
    fn as_eip1193(self: Arc<Self>) -> Option<Arc<dyn Eip1193Provider>> {
        Some(self)
    }
}

/// Error-first callback provider; answers from a spawned task
pub struct MockCallback {
    handler: ProviderHandler,
    pub calls: AtomicUsize,
}

impl MockCallback {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: handler(f),
            calls: AtomicUsize::new(0),
        })
    }
}

impl LegacyCallbackProvider for MockCallback {
    fn send(&self, payload: Value, callback: ProviderCallback) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let handler = self.handler.clone();
        tokio::spawn(async move {
            callback(handler(payload));
        });
    }
}

impl ProviderCapabilities for MockCallback {
    fn as_legacy_callback(self: Arc<Self>) -> Option<Arc<dyn LegacyCallbackProvider>> {
        Some(self)
    }
}

/// Future-returning legacy provider with an optional answer delay
pub struct MockAsync {
    handler: ProviderHandler,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl MockAsync {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self::delayed(f, None)
    }

    pub fn delayed<F>(f: F, delay: Option<Duration>) -> Arc<Self>
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: handler(f),
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LegacyAsyncProvider for MockAsync {
    async fn send_async(&self, payload: Value) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(payload)
    }
}

impl ProviderCapabilities for MockAsync {
    fn as_legacy_async(self: Arc<Self>) -> Option<Arc<dyn LegacyAsyncProvider>> {
        Some(self)
    }
}

/// Provider with server push, driven by the test
pub struct MockSubscribable {
    handler: ProviderHandler,
    listeners: ListenerRegistry,
    supports: bool,
    pub requests: Mutex<Vec<Value>>,
}

impl MockSubscribable {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: handler(f),
            listeners: ListenerRegistry::new(),
            supports: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A subscribable-shaped provider that reports no subscription support
    pub fn without_subscriptions() -> Arc<Self> {
        Arc::new(Self {
            handler: node_handler(),
            listeners: ListenerRegistry::new(),
            supports: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Deliver a push frame to every listener
    pub fn push(&self, frame: Value) {
        self.listeners.emit(ProviderMessage::Message(frame));
    }

    /// Simulate a dropped and re-established connection
    pub fn reconnect(&self) {
        self.listeners.emit(ProviderMessage::Disconnected);
        self.listeners.emit(ProviderMessage::Connected);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Methods of every request received, in order
    pub fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl SubscribableProvider for MockSubscribable {
    async fn request(&self, payload: Value) -> Result<Option<Value>> {
        self.requests.lock().unwrap().push(payload.clone());
        (self.handler)(payload)
    }

    fn supports_subscriptions(&self) -> bool {
        self.supports
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl ProviderCapabilities for MockSubscribable {
    fn as_subscribable(self: Arc<Self>) -> Option<Arc<dyn SubscribableProvider>> {
        Some(self)
    }
}

/// Handler that hands out `sub-1`, `sub-2`, .. for subscribe calls and
/// otherwise behaves like [`node_reply`]
pub fn counting_subscriptions() -> ProviderHandler {
    let counter = Arc::new(AtomicUsize::new(0));
    handler(move |payload| {
        if payload["method"] == "eth_subscribe" {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(Some(mock_response(
                payload["id"].as_i64().unwrap_or_default(),
                json!(format!("sub-{}", n)),
            )));
        }
        Ok(Some(node_reply(&payload)))
    })
}

/// Wrap a [`ProviderHandler`] for the `new` constructors
pub fn from_handler(h: ProviderHandler) -> impl Fn(Value) -> Result<Option<Value>> + Send + Sync {
    move |payload| h(payload)
}

/// A provider handler that always fails at the transport level
pub fn unreachable_node() -> impl Fn(Value) -> Result<Option<Value>> + Send + Sync {
    |_| Err(Error::Io("connection refused".to_string()))
}
