//! Example: pipelined GETs
//!
//! Writes a batch of GET requests on one connection without waiting for the
//! responses in between, then reads them back in order.
//!
//! Usage:
//!   cargo run --bin users-server
//!   cargo run --bin pipelined-get -- http://localhost:3000

use std::time::Instant;

use h1pipe_client::{Client, RequestOptions};
use serde_json::Value;

const BATCH: u32 = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h1pipe_examples::init_tracing();
    let base_url = h1pipe_examples::server_url();

    let client = Client::builder(&base_url).pipelining(8).build()?;
    let mut stats = client.watch_stats();
    tokio::spawn(async move {
        while stats.changed().await.is_ok() {
            let snapshot = stats.borrow_and_update().clone();
            tracing::debug!(
                running = snapshot.running,
                pending = snapshot.pending,
                phase = ?snapshot.phase,
                "stats"
            );
        }
    });

    let start = Instant::now();
    let responses = (1..=BATCH)
        .map(|id| client.send(RequestOptions::get(format!("/users/{id}"))))
        .collect::<Result<Vec<_>, _>>()?;
    println!("Dispatched {} requests, {} on the wire", BATCH, client.running());

    for response in responses {
        let response = response.await?;
        let user: Value = serde_json::from_slice(&response.body.collect().await?)?;
        println!("  {} {}", response.status, user);
    }
    println!("Done in {:?}", start.elapsed());

    client.close().await?;
    Ok(())
}
