//! Batch request integration tests

mod common;

use common::{from_handler, mock_error_response, mock_response, node_handler, MockAsync, MockEip1193};
use nodewire_client::{ProviderCapabilities, RequestManager};
use nodewire_core::{Error, Id, RpcCall};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

async fn manager_with(object: Arc<dyn ProviderCapabilities>) -> RequestManager {
    let manager = RequestManager::new();
    manager.set_provider(object).await.unwrap();
    manager
}

#[tokio::test]
async fn test_batch_resolves_each_call() {
    let reply = json!([
        {"id": 10, "jsonrpc": "2.0", "result": "request-1-result"},
        {"id": 11, "jsonrpc": "2.0", "result": "request-2-result"}
    ]);
    let canned = reply.clone();
    let manager = manager_with(MockEip1193::new(move |payload| {
        let methods: Vec<&str> = payload
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["method"].as_str().unwrap())
            .collect();
        assert_eq!(methods, vec!["my_method", "my_method2"]);
        Ok(Some(canned.clone()))
    }))
    .await;

    let mut batch = manager.batch();
    let first = batch.add(RpcCall::new("my_method").with_id(10i64));
    let second = batch.add(RpcCall::new("my_method2").with_id(11i64));
    assert_eq!(batch.ids(), vec![Id::Number(10), Id::Number(11)]);

    let responses = batch.execute().await.unwrap();

    assert_eq!(first.await.unwrap(), json!("request-1-result"));
    assert_eq!(second.await.unwrap(), json!("request-2-result"));
    assert_eq!(serde_json::to_value(&responses).unwrap(), reply);
}

#[tokio::test]
async fn test_empty_batch_sends_nothing() {
    let provider = MockEip1193::new(|_| panic!("empty batch must not be sent"));
    let manager = manager_with(provider.clone()).await;

    let responses = manager.batch().execute().await.unwrap();
    assert!(responses.is_empty());
    assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_answered_out_of_order() {
    let manager = manager_with(MockAsync::new(|payload| {
        let mut replies: Vec<Value> = payload
            .as_array()
            .unwrap()
            .iter()
            .map(|r| mock_response(r["id"].as_i64().unwrap(), r["method"].clone()))
            .collect();
        replies.reverse();
        Ok(Some(Value::Array(replies)))
    }))
    .await;

    let mut batch = manager.batch();
    let a = batch.add(RpcCall::new("eth_chainId"));
    let b = batch.add(RpcCall::new("net_version"));
    let c = batch.add(RpcCall::new("eth_blockNumber"));
    batch.execute().await.unwrap();

    assert_eq!(a.await.unwrap(), json!("eth_chainId"));
    assert_eq!(b.await.unwrap(), json!("net_version"));
    assert_eq!(c.await.unwrap(), json!("eth_blockNumber"));
}

#[tokio::test]
async fn test_batch_entry_error_rejects_only_that_call() {
    let manager = manager_with(MockAsync::new(from_handler(node_handler()))).await;

    let mut batch = manager.batch();
    let ok = batch.add(RpcCall::new("eth_blockNumber"));
    let missing = batch.add(RpcCall::new("eth_doesNotExist"));
    let responses = batch.execute().await.unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(ok.await.unwrap(), json!("0x10"));
    match missing.await.unwrap_err() {
        Error::JsonRpc(data) => assert_eq!(data.code, -32601),
        other => panic!("expected JsonRpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_size_mismatch() {
    let manager = manager_with(MockAsync::new(|payload| {
        let first = payload[0]["id"].as_i64().unwrap();
        Ok(Some(json!([mock_response(first, json!("0x1"))])))
    }))
    .await;

    let mut batch = manager.batch();
    let a = batch.add(RpcCall::new("eth_chainId"));
    let b = batch.add(RpcCall::new("net_version"));

    let err = batch.execute().await.unwrap_err();
    assert!(matches!(
        err,
        Error::BatchSizeMismatch {
            expected: 2,
            actual: Some(1)
        }
    ));
    assert!(matches!(a.await, Err(Error::OperationAbort(_))));
    assert!(matches!(b.await, Err(Error::OperationAbort(_))));
}

#[tokio::test]
async fn test_batch_non_array_answer() {
    let manager = manager_with(MockAsync::new(|_| {
        Ok(Some(mock_error_response(0, -32600, "batch not supported")))
    }))
    .await;

    let mut batch = manager.batch();
    let call = batch.add(RpcCall::new("eth_chainId"));

    let err = batch.execute().await.unwrap_err();
    assert!(matches!(
        err,
        Error::BatchSizeMismatch {
            expected: 1,
            actual: None
        }
    ));
    assert!(call.await.is_err());
}

#[tokio::test]
async fn test_batch_id_mismatch() {
    let manager = manager_with(MockAsync::new(|payload| {
        let replies: Vec<Value> = payload
            .as_array()
            .unwrap()
            .iter()
            .map(|r| mock_response(r["id"].as_i64().unwrap() + 100, json!("0x1")))
            .collect();
        Ok(Some(Value::Array(replies)))
    }))
    .await;

    let mut batch = manager.batch();
    let a = batch.add(RpcCall::new("eth_chainId").with_id(1i64));
    let b = batch.add(RpcCall::new("net_version").with_id(2i64));

    let err = batch.execute().await.unwrap_err();
    match err {
        Error::BatchIdMismatch {
            requested,
            received,
        } => {
            assert_eq!(requested, vec![Id::Number(1), Id::Number(2)]);
            assert_eq!(received, vec![Id::Number(101), Id::Number(102)]);
        }
        other => panic!("expected BatchIdMismatch, got {:?}", other),
    }
    assert!(matches!(a.await, Err(Error::OperationAbort(ref m)) if m == "Invalid batch response"));
    assert!(matches!(b.await, Err(Error::OperationAbort(_))));
}

#[tokio::test]
async fn test_batch_timeout_aborts_calls() {
    let manager = manager_with(MockAsync::delayed(
        from_handler(node_handler()),
        Some(Duration::from_millis(500)),
    ))
    .await;

    let mut batch = manager.batch().with_timeout(Duration::from_millis(50));
    let call = batch.add(RpcCall::new("eth_blockNumber"));

    let err = batch.execute().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(call.await, Err(Error::OperationAbort(ref m)) if m == "Batch request timeout"));
}

#[tokio::test]
async fn test_batch_transport_failure_rejects_calls() {
    let manager = manager_with(MockAsync::new(|_| Err(Error::Io("broken pipe".to_string())))).await;

    let mut batch = manager.batch();
    let a = batch.add(RpcCall::new("eth_chainId"));
    let b = batch.add(RpcCall::new("net_version"));

    let err = batch.execute().await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(matches!(a.await, Err(Error::Io(ref m)) if m == "broken pipe"));
    assert!(matches!(b.await, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_batch_without_provider() {
    let manager = RequestManager::new();

    let mut batch = manager.batch();
    let call = batch.add(RpcCall::new("eth_chainId"));

    assert!(matches!(batch.execute().await, Err(Error::ProviderNotAvailable)));
    assert!(matches!(call.await, Err(Error::ProviderNotAvailable)));
}
