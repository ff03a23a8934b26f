//! Batch requests
//!
//! A [`BatchRequest`] queues calls that share one wire round trip. Each
//! [`add`](BatchRequest::add) returns that call's own future right away;
//! [`execute`](BatchRequest::execute) sends the array, validates the answer
//! as a whole and then settles every per-call future.
//!
//! # Outcomes
//!
//! - well-formed answer: each call resolves with its `result` or rejects
//!   with the raw [`Error::JsonRpc`] object; the batch returns every response
//! - wrong length or not an array: [`Error::BatchSizeMismatch`]
//! - ids that do not match the request ids as a set:
//!   [`Error::BatchIdMismatch`]
//! - deadline passed: `OperationTimeout("Batch request timeout")`
//! - transport failure: the same error everywhere
//!
//! On a structural failure every per-call future rejects with
//! `OperationAbort("Invalid batch response")`; on a timeout with
//! `OperationAbort("Batch request timeout")`.
//!
//! ```rust,no_run
//! use nodewire_client::RequestManager;
//! use nodewire_core::RpcCall;
//! use serde_json::json;
//!
//! # async fn example(manager: RequestManager) -> nodewire_core::Result<()> {
//! let mut batch = manager.batch();
//! let balance = batch.add(
//!     RpcCall::new("eth_getBalance").with_params(vec![json!("0x407d73d8a49eeb85d32cf465507dd71d507100c1"), json!("latest")]),
//! );
//! let block = batch.add(RpcCall::new("eth_blockNumber"));
//!
//! batch.execute().await?;
//! println!("{} at {}", balance.await?, block.await?);
//! # Ok(())
//! # }
//! ```

use crate::manager::RequestManager;
use nodewire_core::{
    codec, deferred, DeferredFuture, Error, Id, JsonRpcRequest, JsonRpcResponse, Resolver, Result,
    RpcCall,
};
use serde_json::Value;
use std::time::Duration;

const TIMEOUT_MESSAGE: &str = "Batch request timeout";
const INVALID_MESSAGE: &str = "Invalid batch response";

struct BatchEntry {
    request: JsonRpcRequest,
    resolver: Resolver<Value>,
}

/// Calls queued for one round trip
pub struct BatchRequest {
    manager: RequestManager,
    entries: Vec<BatchEntry>,
    timeout: Duration,
}

impl BatchRequest {
    /// An empty batch using the manager's batch timeout
    pub fn new(manager: RequestManager) -> Self {
        let timeout = manager.config().batch_timeout;
        Self {
            manager,
            entries: Vec::new(),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue a call; an id is drawn from the manager when it has none
    pub fn add(&mut self, call: RpcCall) -> DeferredFuture<Value> {
        let request = self.manager.prepare(call);
        let (resolver, future) = deferred();
        self.entries.push(BatchEntry { request, resolver });
        future
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of the queued calls in queue order
    pub fn ids(&self) -> Vec<Id> {
        self.entries.iter().map(|e| e.request.id.clone()).collect()
    }

    /// Send every queued call and settle their futures
    #[tracing::instrument(skip(self), fields(batch_size = self.entries.len()))]
    pub async fn execute(self) -> Result<Vec<JsonRpcResponse>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<JsonRpcRequest> =
            self.entries.iter().map(|e| e.request.clone()).collect();

        let raw = match tokio::time::timeout(self.timeout, self.manager.send_batch(requests.clone()))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Batch transport failed");
                for entry in &self.entries {
                    entry.resolver.reject(e.clone());
                }
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Batch timed out");
                self.abort_all(TIMEOUT_MESSAGE);
                return Err(Error::OperationTimeout(TIMEOUT_MESSAGE.to_string()));
            }
        };

        let responses = match validate(&requests, raw) {
            Ok(responses) => responses,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting batch response");
                self.abort_all(INVALID_MESSAGE);
                return Err(e);
            }
        };

        for entry in &self.entries {
            let outcome = match responses.iter().find(|r| r.id == entry.request.id) {
                Some(response) => settle_outcome(response),
                None => Err(Error::invalid_response("no response for request")),
            };
            entry.resolver.settle(outcome);
        }

        tracing::debug!(response_count = responses.len(), "Batch completed");
        Ok(responses)
    }

    fn abort_all(&self, message: &str) {
        for entry in &self.entries {
            entry
                .resolver
                .reject(Error::OperationAbort(message.to_string()));
        }
    }
}

impl std::fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRequest")
            .field("ids", &self.ids())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn settle_outcome(response: &JsonRpcResponse) -> Result<Value> {
    if let Some(ref error) = response.error {
        return Err(Error::JsonRpc(error.clone()));
    }
    response
        .result
        .clone()
        .ok_or_else(|| Error::invalid_response("response carries no result"))
}

/// Check that `raw` answers exactly `requests`
fn validate(requests: &[JsonRpcRequest], raw: Value) -> Result<Vec<JsonRpcResponse>> {
    let items = match raw {
        Value::Array(items) if items.len() == requests.len() => items,
        Value::Array(items) => {
            return Err(Error::BatchSizeMismatch {
                expected: requests.len(),
                actual: Some(items.len()),
            })
        }
        _ => {
            return Err(Error::BatchSizeMismatch {
                expected: requests.len(),
                actual: None,
            })
        }
    };

    let responses = items
        .into_iter()
        .map(codec::decode_response)
        .collect::<Result<Vec<_>>>()?;

    let requested: Vec<Id> = requests.iter().map(|r| r.id.clone()).collect();
    let received: Vec<Id> = responses.iter().map(|r| r.id.clone()).collect();
    if !same_ids(&requested, &received) {
        return Err(Error::BatchIdMismatch {
            requested,
            received,
        });
    }

    Ok(responses)
}

// Multiset comparison; the display form keeps `1` and `"1"` apart.
fn same_ids(a: &[Id], b: &[Id]) -> bool {
    let mut a: Vec<String> = a.iter().map(Id::to_string).collect();
    let mut b: Vec<String> = b.iter().map(Id::to_string).collect();
    a.sort();
    b.sort();
    a == b
}
