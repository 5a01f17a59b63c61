//! Manual test: connect to a feed backend, join a price room, and print
//! updates.
//!
//! Usage: cargo run --example watch -- <ws-url> <token-address>

use feed_client::{FeedClient, FeedClientConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "ws://localhost:9001/ws".to_string());
    let token = args.next().unwrap_or_else(|| "TOKENX".to_string());

    let client = FeedClient::new(FeedClientConfig::new(url.clone(), url));

    let room = common::protocol::price_room(&token);
    client.join_room(&room).await?;
    println!("joined {}", room);

    client.on(&common::protocol::price_by_token_topic(&token), |data| {
        println!("price update: {:?}", data.price);
        Ok(())
    });

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.shutdown().await;
    Ok(())
}
