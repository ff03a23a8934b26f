//! Typed event channels
//!
//! Long-running operations report progress on a broadcast channel that is
//! separate from their terminal future: the future carries the outcome,
//! the [`EventStream`] carries everything that happens on the way.

use crate::deferred::DeferredFuture;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Broadcasting half of an event channel
///
/// Emitting never blocks and never fails; events sent while nobody listens
/// are dropped.
#[derive(Debug)]
pub struct EventChannel<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventChannel<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to every current listener
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// Start listening; only events emitted after this call are observed
    pub fn subscribe(&self) -> EventStream<E> {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of an event channel
#[derive(Debug)]
pub struct EventStream<E> {
    rx: broadcast::Receiver<E>,
}

impl<E: Clone> EventStream<E> {
    /// Wait for the next event. `None` once every sender is gone.
    ///
    /// A slow listener that falls behind skips the events it missed.
    pub async fn next(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take an already queued event without waiting
    pub fn try_next(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// A terminal future paired with its progress events
pub struct Evented<T, E> {
    /// Settles once with the operation's outcome
    pub result: DeferredFuture<T>,
    /// Progress events, ending when the operation completes
    pub events: EventStream<E>,
}

impl<T, E> Evented<T, E> {
    pub fn new(result: DeferredFuture<T>, events: EventStream<E>) -> Self {
        Self { result, events }
    }

    pub fn into_parts(self) -> (DeferredFuture<T>, EventStream<E>) {
        (self.result, self.events)
    }
}
