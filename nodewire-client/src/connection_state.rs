//! Connection lifecycle for socket transports
//!
//! ```text
//! Disconnected → Connecting → Connected
//!                     ↓           ↓
//!                  Failed ← Reconnecting { attempt }
//! ```
//!
//! The current state is published on a `watch` channel so callers can wait
//! for a transition instead of polling.

use crate::reconnect::ReconnectionStrategy;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Socket connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The strategy gave up
    Failed,
}

impl ConnectionState {
    /// Numeric encoding used by the connection-state gauge
    pub fn as_metric(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting { .. } => 3,
            ConnectionState::Failed => 4,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Tracks state and drives the reconnection strategy for one endpoint
pub struct ConnectionManager {
    state: watch::Sender<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    endpoint: String,
}

impl ConnectionManager {
    pub fn new(endpoint: impl Into<String>, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            strategy: Mutex::new(strategy),
            endpoint: endpoint.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(endpoint = %self.endpoint, state = ?state, "Connection state changed");
        self.state.send_replace(state);
    }

    pub fn connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }

    /// Mark the connection live and reset the strategy
    pub fn connected(&self) {
        self.set_state(ConnectionState::Connected);
        self.with_strategy(|s| s.reset());
    }

    pub fn disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Enter the reconnecting state at attempt zero
    pub fn start_reconnecting(&self) {
        self.set_state(ConnectionState::Reconnecting { attempt: 0 });
    }

    /// Delay before the next attempt, advancing the attempt counter
    ///
    /// Returns `None` and moves to `Failed` once the strategy gives up.
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        let attempt = match self.state() {
            ConnectionState::Reconnecting { attempt } => attempt,
            _ => 0,
        };

        let delay = self.with_strategy(|s| s.next_delay(attempt));
        match delay {
            Some(_) => self.set_state(ConnectionState::Reconnecting {
                attempt: attempt + 1,
            }),
            None => self.set_state(ConnectionState::Failed),
        }
        delay
    }

    fn with_strategy<R>(&self, f: impl FnOnce(&mut dyn ReconnectionStrategy) -> R) -> R {
        let mut guard = match self.strategy.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut **guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{ExponentialBackoff, NoReconnect};

    fn manager(max_attempts: u32) -> ConnectionManager {
        let strategy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
            .with_max_attempts(max_attempts);
        ConnectionManager::new("ws://localhost:8546", Box::new(strategy))
    }

    #[test]
    fn test_state_transitions() {
        let cm = manager(3);
        assert_eq!(cm.state(), ConnectionState::Disconnected);

        cm.connecting();
        assert_eq!(cm.state(), ConnectionState::Connecting);

        cm.connected();
        assert!(cm.state().is_connected());

        cm.disconnected();
        assert_eq!(cm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnection_attempts_until_failed() {
        let cm = manager(2);
        cm.start_reconnecting();

        assert!(cm.next_reconnect_delay().is_some());
        assert_eq!(cm.state(), ConnectionState::Reconnecting { attempt: 1 });

        assert!(cm.next_reconnect_delay().is_some());
        assert_eq!(cm.state(), ConnectionState::Reconnecting { attempt: 2 });

        assert!(cm.next_reconnect_delay().is_none());
        assert_eq!(cm.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_no_reconnect_fails_immediately() {
        let cm = ConnectionManager::new("/tmp/geth.ipc", Box::new(NoReconnect));
        cm.start_reconnecting();

        assert!(cm.next_reconnect_delay().is_none());
        assert_eq!(cm.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_watch_observes_transitions() {
        let cm = manager(3);
        let mut rx = cm.watch();

        cm.connecting();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        cm.connected();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_metric_encoding() {
        assert_eq!(ConnectionState::Disconnected.as_metric(), 0);
        assert_eq!(ConnectionState::Connected.as_metric(), 2);
        assert_eq!(ConnectionState::Reconnecting { attempt: 4 }.as_metric(), 3);
        assert_eq!(ConnectionState::Failed.as_metric(), 4);
    }
}
