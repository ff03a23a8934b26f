//! Reconnection strategies for socket transports
//!
//! When a WebSocket or IPC connection drops, the transport asks its strategy
//! how long to wait before the next attempt, or whether to give up.
//!
//! - **ExponentialBackoff**: doubling delays, capped, optional jitter
//! - **FixedDelay**: constant delay
//! - **NoReconnect**: fail the first time
//!
//! Every new socket provider gets a fresh strategy, so configuration holds a
//! [`StrategyFactory`] rather than a strategy instance.
//!
//! ```rust
//! use nodewire_client::{strategy_factory, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let factory = strategy_factory(
//!     ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(30))
//!         .with_max_attempts(20),
//! );
//! let mut strategy = factory();
//! assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(250)));
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Decides the delay before each reconnection attempt
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed), `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called after a successful connection
    fn reset(&mut self);
}

/// Produces a fresh strategy for each connection
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn ReconnectionStrategy> + Send + Sync>;

/// Wrap a cloneable strategy into a factory
pub fn strategy_factory<S>(strategy: S) -> StrategyFactory
where
    S: ReconnectionStrategy + Clone + 'static,
{
    Arc::new(move || Box::new(strategy.clone()))
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add up to 25% random delay so many clients do not retry in lockstep
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
            .with_max_attempts(10)
            .with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let base = (self.min_delay.as_millis() as u64).saturating_mul(factor);
        let delay = base.min(self.max_delay.as_millis() as u64);

        if self.jitter && delay >= 4 {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }

        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Never reconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
