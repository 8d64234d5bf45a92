//! Call-style wrappers over [`Client::dispatch`](crate::Client::dispatch).
//!
//! - [`Client::request`](crate::Client::request): status, headers and a body stream
//! - [`Client::stream`](crate::Client::stream): body written into a caller-provided `AsyncWrite`
//! - [`Client::pipeline`](crate::Client::pipeline): request body sender plus the response
//! - [`Client::upgrade`](crate::Client::upgrade) and [`Client::connect`](crate::Client::connect):
//!   the raw socket after a protocol switch

mod pipeline;
mod request;
mod stream;
mod upgrade;

pub use pipeline::{BodySender, Pipeline};
pub use request::{ResponseBody, ResponseData, ResponseFuture};
pub use stream::{StreamData, StreamHead};
pub use upgrade::{ConnectData, DEFAULT_UPGRADE_PROTOCOL, UpgradeData};

use crate::client::RequestHandle;

/// Aborts the request when dropped, unless disarmed first.
struct AbortOnDrop(Option<RequestHandle>);

impl AbortOnDrop {
    fn new(handle: RequestHandle) -> Self {
        Self(Some(handle))
    }

    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
