//! Batch request example against an in-process node
//!
//! The node answers from a fixed table, so this runs without a network.
//!
//! Run with: cargo run --example batch

use async_trait::async_trait;
use nodewire::client::Eip1193Provider;
use nodewire::{Provider, RequestManager, RpcCall};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Answers a handful of read-only calls
struct LocalNode;

impl LocalNode {
    fn answer(&self, request: &Value) -> Value {
        let result = match request["method"].as_str() {
            Some("eth_chainId") => json!("0x1"),
            Some("eth_blockNumber") => json!("0x12a05f2"),
            Some("net_version") => json!("1"),
            Some("eth_getBlockByNumber") => json!({
                "number": "0x12a05f2",
                "hash": "0x5d15649e25d8f3e2c0374946078539d200710afc977cdfc6a977bd23f20fa8e8",
                "gasUsed": "0x1c9c380"
            }),
            _ => {
                return json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": {"code": -32601, "message": "method not found"}
                })
            }
        };
        json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
    }
}

#[async_trait]
impl Eip1193Provider for LocalNode {
    async fn request(&self, payload: Value) -> nodewire::Result<Option<Value>> {
        let response = match payload.as_array() {
            Some(batch) => Value::Array(batch.iter().map(|r| self.answer(r)).collect()),
            None => self.answer(&payload),
        };
        tracing::debug!(response = %response, "Node answered");
        Ok(Some(response))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Block {
    number: String,
    hash: String,
    gas_used: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info,nodewire_client=debug")
        .init();

    let manager = RequestManager::new();
    manager
        .set_provider(Provider::Eip1193(Arc::new(LocalNode)))
        .await?;

    // Single call, decoded into a typed struct
    let raw = manager
        .send(RpcCall::new("eth_getBlockByNumber").with_params(vec![json!("latest"), json!(false)]))
        .await?;
    let block: Block = serde_json::from_value(raw)?;
    println!("Latest block {} ({}), gas used {}", block.number, block.hash, block.gas_used);

    // One round trip for several calls
    let mut batch = manager.batch();
    let chain = batch.add(RpcCall::new("eth_chainId"));
    let height = batch.add(RpcCall::new("eth_blockNumber"));
    let unknown = batch.add(RpcCall::new("debug_traceCall"));
    let responses = batch.execute().await?;
    tracing::info!(count = responses.len(), "Batch executed");

    println!("Chain id: {}", chain.await?);
    println!("Height:   {}", height.await?);
    match unknown.await {
        Ok(value) => println!("Unexpected answer: {}", value),
        Err(e) => println!("debug_traceCall failed as expected: {}", e),
    }

    Ok(())
}
