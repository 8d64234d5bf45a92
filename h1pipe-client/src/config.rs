//! Configuration for requests and for the connection's reconnect policy.
//!
//! - [`RequestOptions`]: Method, path, headers, body and per-request flags
//! - [`ReconnectPolicy`]: Backoff between connection attempts

mod backoff;
mod options;

pub use backoff::{ReconnectBackoff, ReconnectPolicy};
pub(crate) use options::RequestParts;
pub use options::{Opaque, RequestOptions};
