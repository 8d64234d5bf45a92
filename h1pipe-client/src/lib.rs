//! Pipelined HTTP/1.1 client over a single connection.
//!
//! A [`Client`] is bound to one origin and owns at most one socket. Requests
//! are queued in order and written up to the configured pipelining depth
//! without waiting for earlier responses. Responses are matched to requests
//! strictly in the order they were written.
//!
//! ## Features
//!
//! - HTTP/1.1 pipelining with per-request idempotency gating
//! - Fixed and streaming request bodies (`content-length` or chunked)
//! - Keep-alive negotiation and automatic reconnect with backoff
//! - Protocol upgrades and `CONNECT` tunnels that hand over the socket
//! - TCP, Unix domain sockets and TLS through `rustls`
//!
//! ## Example
//!
//! ```ignore
//! use h1pipe_client::{Client, RequestOptions};
//!
//! let client = Client::builder("http://localhost:3000")
//!     .pipelining(8)
//!     .build()?;
//!
//! // Both requests are written before the first response arrives.
//! let first = client.send(RequestOptions::get("/users/1"))?;
//! let second = client.send(RequestOptions::get("/users/2"))?;
//!
//! let first = first.await?.body.collect().await?;
//! let second = second.await?.body.collect().await?;
//!
//! client.close().await?;
//! ```
//!
//! ## Low-level dispatch
//!
//! [`Client::dispatch`] takes a [`Handler`] whose callbacks run on the
//! connection task. The call-style wrappers (`request`, `stream`,
//! `pipeline`, `upgrade`, `connect`) are built on top of it.
//!
//! ```ignore
//! use h1pipe_client::{Bytes, ClientError, Flow, Handler, HeaderMap, Resumer, StatusCode};
//!
//! struct Count(usize);
//!
//! impl Handler for Count {
//!     fn on_headers(&mut self, _: StatusCode, _: &HeaderMap, _: Resumer) -> Flow {
//!         Flow::Continue
//!     }
//!     fn on_body(&mut self, chunk: Bytes) -> Flow {
//!         self.0 += chunk.len();
//!         Flow::Continue
//!     }
//!     fn on_complete(&mut self, _: HeaderMap) {
//!         println!("{} bytes", self.0);
//!     }
//!     fn on_error(&mut self, err: ClientError) {
//!         eprintln!("failed: {err}");
//!     }
//! }
//!
//! let handle = client.dispatch(RequestOptions::get("/large"), Count(0))?;
//! ```

mod api;
mod builder;
mod client;
mod config;
mod dispatcher;
mod error;
mod handler;
pub mod transport;

pub use api::{
    BodySender, ConnectData, DEFAULT_UPGRADE_PROTOCOL, Pipeline, ResponseBody, ResponseData,
    ResponseFuture, StreamData, StreamHead, UpgradeData,
};
pub use builder::{ClientBuilder, defaults};
pub use client::{Client, RequestHandle};
pub use config::{Opaque, ReconnectBackoff, ReconnectPolicy, RequestOptions};
pub use dispatcher::{ClientStats, ConnectionEvent, Phase};
pub use error::{ClientError, ErrorKind};
pub use handler::{Flow, Handler, Resumer};
pub use transport::{RequestBody, Upgraded};

pub use bytes::Bytes;
pub use h1pipe_core::CodecError;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};
