//! Example: streaming upload
//!
//! Sends a chunked request body through [`Client::pipeline`]. Each `send`
//! waits while the connection is still writing earlier chunks.
//!
//! Usage:
//!   cargo run --bin users-server
//!   cargo run --bin upload-stream -- http://localhost:3000

use h1pipe_client::{Client, Pipeline, RequestOptions};

const CHUNKS: usize = 64;
const CHUNK_SIZE: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h1pipe_examples::init_tracing();
    let base_url = h1pipe_examples::server_url();
    let client = Client::builder(&base_url).build()?;

    let Pipeline { mut body, response } = client.pipeline(
        RequestOptions::post("/upload").header("content-type", "application/octet-stream"),
    )?;

    let producer = tokio::spawn(async move {
        let chunk = vec![b'x'; CHUNK_SIZE];
        for _ in 0..CHUNKS {
            body.send(chunk.clone()).await?;
        }
        body.finish();
        Ok::<_, h1pipe_client::ClientError>(())
    });

    let response = response.await?;
    let received = response.body.collect().await?;
    producer.await??;

    println!(
        "Server received {} bytes (sent {})",
        String::from_utf8_lossy(&received),
        CHUNKS * CHUNK_SIZE
    );
    client.close().await?;
    Ok(())
}
