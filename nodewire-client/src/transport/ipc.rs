//! IPC transport over a Unix domain socket
//!
//! Nodes write JSON values back to back with no framing guarantee, so the
//! reader tracks bracket depth across reads and decodes each object or
//! array once its closing bracket arrives. Every byte is scanned once, so a
//! large response split over many reads costs no more than one read.
//! Outgoing payloads are newline-terminated.

use crate::connection_state::ConnectionState;
use crate::provider::{Listener, ListenerId, ProviderCapabilities, SubscribableProvider};
use crate::transport::socket::{Connector, FrameSink, FrameStream, SocketClient};
use crate::transport::SocketConfig;
use async_trait::async_trait;
use futures::{sink, stream};
use nodewire_core::{Error, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::watch;

const READ_CHUNK: usize = 8 * 1024;

struct IpcConnector {
    path: PathBuf,
    endpoint: String,
}

#[async_trait]
impl Connector for IpcConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let socket = UnixStream::connect(&self.path).await?;
        let (reader, writer) = socket.into_split();

        let sink = sink::unfold(writer, |mut writer, text: String| async move {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            Ok::<_, Error>(writer)
        });

        let state = ReadState {
            reader,
            splitter: FrameSplitter::default(),
            ready: VecDeque::new(),
            failed: false,
        };
        let stream = stream::unfold(state, |mut state| async move {
            let item = state.next_frame().await?;
            Some((item, state))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct ReadState {
    reader: OwnedReadHalf,
    splitter: FrameSplitter,
    ready: VecDeque<Value>,
    failed: bool,
}

impl ReadState {
    /// Next decoded value; `None` at end of stream
    async fn next_frame(&mut self) -> Option<Result<Value>> {
        if self.failed {
            return None;
        }

        loop {
            if let Some(value) = self.ready.pop_front() {
                return Some(Ok(value));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.reader.read(&mut chunk).await {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            };
            if let Err(e) = self.splitter.push(&chunk[..n], &mut self.ready) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

/// Splits a byte stream into top-level JSON objects and arrays
///
/// `scanned` marks where the next read resumes; `start` is the offset of the
/// value currently open, if any.
#[derive(Default)]
struct FrameSplitter {
    buf: Vec<u8>,
    scanned: usize,
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameSplitter {
    /// Append `bytes` and move every value they complete into `out`
    ///
    /// Values completed before corrupt input are still delivered.
    fn push(&mut self, bytes: &[u8], out: &mut VecDeque<Value>) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        let mut consumed = 0;

        let result = self.scan(&mut consumed, out);

        self.buf.drain(..consumed);
        self.scanned -= consumed;
        self.start = self.start.map(|s| s - consumed);
        result
    }

    fn scan(&mut self, consumed: &mut usize, out: &mut VecDeque<Value>) -> Result<()> {
        while self.scanned < self.buf.len() {
            let i = self.scanned;
            let byte = self.buf[i];
            self.scanned += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'{' | b'[' => {
                    if self.depth == 0 {
                        self.start = Some(i);
                    }
                    self.depth += 1;
                }
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let from = self.start.take().unwrap_or(*consumed);
                        let value = serde_json::from_slice(&self.buf[from..=i])
                            .map_err(|e| corrupt(&e))?;
                        out.push_back(value);
                        *consumed = i + 1;
                    }
                }
                b'"' if self.depth > 0 => self.in_string = true,
                b' ' | b'\t' | b'\r' | b'\n' if self.depth == 0 => *consumed = i + 1,
                _ if self.depth == 0 => {
                    return Err(corrupt(&format!("unexpected byte 0x{:02x}", byte)));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn corrupt(reason: &dyn std::fmt::Display) -> Error {
    Error::invalid_response(format!("corrupt IPC stream: {}", reason))
}

/// JSON-RPC over a Unix domain socket
pub struct IpcProvider {
    client: SocketClient,
}

impl IpcProvider {
    /// Start connecting to the socket at `path` in the background
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(path: impl AsRef<Path>, config: SocketConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let endpoint = path.display().to_string();
        tracing::info!(url = %endpoint, "Opening IPC provider");
        Self {
            client: SocketClient::spawn(IpcConnector { path, endpoint }, config),
        }
    }

    pub fn path(&self) -> &str {
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
impl SubscribableProvider for IpcProvider {
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

impl ProviderCapabilities for IpcProvider {
    fn as_subscribable(self: Arc<Self>) -> Option<Arc<dyn SubscribableProvider>> {
        Some(self)
    }
}
