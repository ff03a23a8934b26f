//! Externally settled futures
//!
//! A deferred splits a future into two halves: a [`Resolver`] that settles
//! the outcome and a [`DeferredFuture`] that awaits it. The resolver can be
//! cloned and moved into callbacks; only the first settlement wins.
//!
//! An optional deadline turns the future into a self-rejecting one: if the
//! resolver has not settled it in time, the future completes with the
//! configured error and later settlements are ignored.
//!
//! # Examples
//!
//! ```rust
//! use nodewire_core::deferred::deferred;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (resolver, future) = deferred::<u64>();
//!
//! assert!(resolver.resolve(7));
//! assert!(!resolver.resolve(8));
//! assert_eq!(future.await.unwrap(), 7);
//! # }
//! ```

use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Sleep;

/// Create an unsettled deferred without a deadline
pub fn deferred<T>() -> (Resolver<T>, DeferredFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Resolver {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        DeferredFuture { rx, deadline: None },
    )
}

/// Create a deferred that rejects with `on_timeout` when not settled in time
///
/// Must be called from within a Tokio runtime.
pub fn deferred_with_timeout<T>(
    timeout: Duration,
    on_timeout: Error,
) -> (Resolver<T>, DeferredFuture<T>) {
    let (resolver, mut future) = deferred();
    future.deadline = Some((Box::pin(tokio::time::sleep(timeout)), on_timeout));
    (resolver, future)
}

/// Settling half of a deferred
pub struct Resolver<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Resolver<T> {
    /// Settle with a value. Returns false if already settled or abandoned.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns false if already settled or abandoned.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Settle with an outcome
    pub fn settle(&self, outcome: Result<T>) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// True once any settlement has been attempted
    pub fn is_settled(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// Awaiting half of a deferred
///
/// Completes with `OperationAbort` if every resolver is dropped without
/// settling.
pub struct DeferredFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
    deadline: Option<(Pin<Box<Sleep>>, Error)>,
}

impl<T> Future for DeferredFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(match outcome {
                Ok(settled) => settled,
                Err(_) => Err(Error::OperationAbort(
                    "Deferred dropped before settlement".to_string(),
                )),
            });
        }

        if let Some((sleep, error)) = this.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                this.rx.close();
                return Poll::Ready(Err(error.clone()));
            }
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (resolver, future) = deferred::<&'static str>();
        let other = resolver.clone();

        assert!(resolver.reject(Error::Internal("first".into())));
        assert!(!other.resolve("second"));
        assert!(other.is_settled());

        let err = future.await.unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m == "first"));
    }

    #[tokio::test]
    async fn test_resolve_from_another_task() {
        let (resolver, future) = deferred::<u32>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.resolve(99);
        });

        assert_eq!(future.await.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_dropped_resolver_aborts() {
        let (resolver, future) = deferred::<u32>();
        drop(resolver);

        assert!(matches!(future.await, Err(Error::OperationAbort(_))));
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_blocks_late_settlement() {
        let (resolver, future) = deferred_with_timeout::<u32>(
            Duration::from_millis(100),
            Error::OperationTimeout("too slow".into()),
        );

        let err = future.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!resolver.resolve(1));
    }

    #[tokio::test]
    async fn test_settled_before_deadline() {
        let (resolver, future) = deferred_with_timeout::<u32>(
            Duration::from_secs(1),
            Error::OperationTimeout("too slow".into()),
        );
        resolver.resolve(5);

        assert_eq!(future.await.unwrap(), 5);
    }
}
