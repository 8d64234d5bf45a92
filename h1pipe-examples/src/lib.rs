//! Shared helpers for the h1pipe example binaries.

use std::env;

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to debug
/// output for the client.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,h1pipe_client=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Server URL from the first argument, then `SERVER_URL`, then the default
/// address of `users-server`.
pub fn server_url() -> String {
    env::args()
        .nth(1)
        .or_else(|| env::var("SERVER_URL").ok())
        .unwrap_or_else(|| "http://localhost:3000".to_string())
}
