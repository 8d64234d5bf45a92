//! Example: backend for the client examples
//!
//! Serves a small JSON API with plain axum routes.
//!
//! Run with: cargo run --bin users-server

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct User {
    id: u32,
    name: String,
}

async fn user(Path(id): Path<u32>) -> Json<User> {
    Json(User {
        id,
        name: format!("user-{id}"),
    })
}

/// Replies with the number of bytes received.
async fn upload(body: Bytes) -> String {
    tracing::info!(bytes = body.len(), "upload received");
    body.len().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h1pipe_examples::init_tracing();

    let app = Router::new()
        .route("/users/{id}", get(user))
        .route("/upload", post(upload));

    let addr: SocketAddr = "127.0.0.1:3000".parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("=== Example: users-server ===");
    println!("Server listening on http://{}", addr);
    println!();
    println!("  GET  /users/{{id}}  - returns a JSON user");
    println!("  POST /upload       - returns the body length");

    axum::serve(listener, app).await?;
    Ok(())
}
