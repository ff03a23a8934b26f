//! Subscription example
//!
//! Follows new block headers over a WebSocket or IPC endpoint until Ctrl-C.
//!
//! Run with: cargo run --example subscriptions -- ws://127.0.0.1:8546

use nodewire::{RequestManagerBuilder, RpcCall, SubscriptionManager};
use nodewire::client::{ExponentialBackoff, SubscriptionEvent};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Head {
    number: String,
    hash: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8546".to_string());

    let manager = RequestManagerBuilder::new()
        .with_provider(endpoint.as_str())
        .with_reconnect(ExponentialBackoff::new(
            Duration::from_millis(200),
            Duration::from_secs(10),
        ))
        .build()
        .await?;

    let chain = manager.send(RpcCall::new("eth_chainId")).await?;
    tracing::info!(endpoint = %endpoint, chain_id = %chain, "Connected");

    let subscriptions = SubscriptionManager::new(manager.clone());
    let heads = subscriptions
        .subscribe(
            "newHeads",
            Value::Null,
            Some(Arc::new(|outcome: nodewire::Result<Value>| {
                match outcome.and_then(|v| {
                    serde_json::from_value::<Head>(v)
                        .map_err(|e| nodewire::Error::invalid_response(e.to_string()))
                }) {
                    Ok(head) => println!("Block {} {}", head.number, head.hash),
                    Err(e) => tracing::warn!(error = %e, "Subscription error"),
                }
            })),
        )
        .await?;

    // Ids change when the connection is re-established.
    let mut events = heads.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SubscriptionEvent::Connected(id) => tracing::info!(subscription_id = %id, "Subscribed"),
                SubscriptionEvent::Disconnected(id) => {
                    tracing::info!(subscription_id = %id, "Subscription dropped")
                }
                _ => {}
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    subscriptions.clear().await?;
    Ok(())
}
