//! Response correlation for socket transports
//!
//! Sockets carry many requests at once and answer them in any order. Every
//! outgoing payload registers a waiter keyed by the ids it carries; the
//! reader task hands each incoming response frame to [`PendingRequests::complete`],
//! which routes it to the waiter that owns one of the frame's ids.
//!
//! A batch payload registers one waiter under all of its ids, so the single
//! array frame that answers it wakes exactly one caller.
//!
//! # Lifecycle
//!
//! 1. `register(ids)` before the payload is queued, returning a [`Ticket`]
//! 2. the caller awaits the returned receiver
//! 3. `complete(frame)` when the answer arrives,
//! 4. `cancel(ticket)` when the caller stops waiting, or
//! 5. `fail_all(error)` when the connection drops

use nodewire_core::{codec, Error, Id, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<Value>>;

/// Handle to one registered payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct Entry {
    waiter: Waiter,
    keys: Vec<String>,
}

#[derive(Default)]
struct PendingInner {
    entries: HashMap<Ticket, Entry>,
    by_id: HashMap<String, Ticket>,
    next_ticket: u64,
}

impl PendingInner {
    fn take(&mut self, ticket: Ticket) -> Option<Waiter> {
        let entry = self.entries.remove(&ticket)?;
        for key in &entry.keys {
            self.by_id.remove(key);
        }
        Some(entry.waiter)
    }
}

/// Outstanding requests on one socket
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<PendingInner>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a waiter for a payload carrying `ids`
    ///
    /// Fails if any id is already outstanding: an id must never be reused
    /// while its response is pending.
    pub fn register(&self, ids: &[Id]) -> Result<(Ticket, oneshot::Receiver<Result<Value>>)> {
        if ids.is_empty() {
            return Err(Error::InvalidRequest(
                "payload carries no request id".to_string(),
            ));
        }

        let mut inner = self.lock();
        if let Some(taken) = ids.iter().find(|id| inner.by_id.contains_key(&id_key(id))) {
            return Err(Error::InvalidRequest(format!(
                "request id {} is already pending",
                taken
            )));
        }

        let (tx, rx) = oneshot::channel();
        let ticket = Ticket(inner.next_ticket);
        inner.next_ticket += 1;
        let keys: Vec<String> = ids.iter().map(id_key).collect();
        for key in &keys {
            inner.by_id.insert(key.clone(), ticket);
        }
        inner.entries.insert(ticket, Entry { waiter: tx, keys });

        Ok((ticket, rx))
    }

    /// Route a response frame to its waiter. Returns false when no waiter
    /// owns any of the frame's ids.
    pub fn complete(&self, frame: Value) -> bool {
        let ids = codec::payload_ids(&frame);
        let mut inner = self.lock();

        let ticket = ids
            .iter()
            .find_map(|id| inner.by_id.get(&id_key(id)).copied());

        match ticket.and_then(|t| inner.take(t)) {
            Some(waiter) => {
                let _ = waiter.send(Ok(frame));
                true
            }
            None => false,
        }
    }

    /// Drop the waiter behind `ticket` without answering it, releasing its
    /// ids. Returns false when the ticket was already settled.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        self.lock().take(ticket).is_some()
    }

    /// Whether `ticket` still waits for an answer
    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.lock().entries.contains_key(&ticket)
    }

    /// Fail every outstanding request
    pub fn fail_all(&self, error: Error) {
        let mut inner = self.lock();
        inner.by_id.clear();
        for (_, entry) in inner.entries.drain() {
            let _ = entry.waiter.send(Err(error.clone()));
        }
    }

    /// Number of payloads still waiting for an answer
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }
}

// Numbers and strings must not collide: `1` and `"1"` are different ids.
fn id_key(id: &Id) -> String {
    match id {
        Id::String(s) => format!("s:{}", s),
        Id::Number(n) => format!("n:{}", n),
        Id::Null => "null".to_string(),
    }
}
