//! Example: protocol upgrade
//!
//! Starts a tiny server that answers `101 Switching Protocols` and then
//! echoes bytes, upgrades a client request and talks over the raw socket.
//!
//! Run with: cargo run --bin upgrade-echo

use h1pipe_client::{Client, RequestOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn echo_server(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Ok(());
        }
        head.push(byte[0]);
    }
    stream
        .write_all(b"HTTP/1.1 101 Switching Protocols\r\nconnection: upgrade\r\nupgrade: echo\r\n\r\n")
        .await?;

    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h1pipe_examples::init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Err(err) = echo_server(stream).await {
                    tracing::warn!(error = %err, "echo server failed");
                }
            });
        }
    });

    let client = Client::builder(&url).build()?;
    let upgraded = client
        .upgrade(RequestOptions::get("/echo").upgrade("echo"))
        .await?;
    println!("Upgraded: {:?}", upgraded.headers);

    let mut socket = upgraded.socket;
    for message in ["hello", "over", "the raw socket"] {
        socket.write_all(message.as_bytes()).await?;
        socket.flush().await?;
        let mut reply = vec![0u8; message.len()];
        socket.read_exact(&mut reply).await?;
        println!("  echoed {:?}", String::from_utf8_lossy(&reply));
    }

    socket.shutdown().await?;
    client.close().await?;
    Ok(())
}
