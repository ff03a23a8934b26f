//! WebSocket transport
//!
//! Text and binary frames are parsed as JSON; frames that do not parse are
//! logged and skipped. A close frame ends the connection and hands control
//! to the reconnection strategy.

use crate::connection_state::ConnectionState;
use crate::provider::{
    Listener, ListenerId, ProviderCapabilities, SubscribableProvider,
};
use crate::transport::socket::{Connector, FrameSink, FrameStream, SocketClient};
use crate::transport::SocketConfig;
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use nodewire_core::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};

struct WsConnector {
    url: String,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| Error::WebSocket(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text))));

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => parse_frame(text.as_bytes()),
                Ok(Message::Binary(bytes)) => parse_frame(&bytes),
                Ok(Message::Close(_)) => Some(Err(Error::ConnectionClosed)),
                Ok(_) => None,
                Err(e) => Some(Err(Error::WebSocket(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn parse_frame(bytes: &[u8]) -> Option<Result<Value>> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(Ok(value)),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping frame that is not JSON");
            None
        }
    }
}

/// JSON-RPC over a WebSocket connection
pub struct WebSocketProvider {
    client: SocketClient,
}

impl WebSocketProvider {
    /// Start connecting to `url` in the background
    ///
    /// Must be called from within a Tokio runtime. Requests sent before the
    /// connection is up are queued.
    pub fn connect(url: impl Into<String>, config: SocketConfig) -> Self {
        let url = url.into();
        tracing::info!(url = %url, "Opening WebSocket provider");
        Self {
            client: SocketClient::spawn(WsConnector { url }, config),
        }
    }

    pub fn url(&self) -> &str {
        self.client.endpoint()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.client.watch_state()
    }

    pub fn disconnect(&self) {
        self.client.disconnect();
    }
}

#[async_trait]
impl SubscribableProvider for WebSocketProvider {
    async fn request(&self, payload: Value) -> Result<Option<Value>> {
        self.client.request(payload).await
    }

    fn supports_subscriptions(&self) -> bool {
        true
    }

    fn on(&self, listener: Listener) -> ListenerId {
        self.client.on(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.client.remove_listener(id)
    }
}

impl ProviderCapabilities for WebSocketProvider {
    fn as_subscribable(self: Arc<Self>) -> Option<Arc<dyn SubscribableProvider>> {
        Some(self)
    }
}
