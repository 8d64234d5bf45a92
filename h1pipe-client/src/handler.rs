//! Callbacks through which a dispatched request observes its response.

use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::mpsc;

use crate::ClientError;
use crate::dispatcher::{Command, RequestId};
use crate::transport::Upgraded;

/// What the connection should do after delivering headers or a body chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Stop reading the socket until [`Resumer::resume`] is called.
    Pause,
    /// Stop delivering body chunks. The rest of the body is read and dropped
    /// so the connection stays usable.
    Discard,
}

/// Restarts reading after a handler returned [`Flow::Pause`].
///
/// Calling it while the request is not paused does nothing.
#[derive(Clone)]
pub struct Resumer {
    tx: mpsc::UnboundedSender<Command>,
    id: RequestId,
}

impl Resumer {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>, id: RequestId) -> Self {
        Self { tx, id }
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume(self.id));
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer").field("id", &self.id).finish()
    }
}

/// Receives the outcome of one request.
///
/// Callbacks run on the connection task in this order: zero or more
/// informational `on_headers`, the final `on_headers`, any `on_body`, and
/// then exactly one terminal callback (`on_complete`, `on_upgrade`, or
/// `on_error`). After the terminal callback the handler is dropped.
///
/// Callbacks must not block. A handler that needs to apply backpressure
/// returns [`Flow::Pause`] and keeps the [`Resumer`].
pub trait Handler: Send + 'static {
    /// Response head. Also called for informational (1xx) heads, whose
    /// returned [`Flow`] is ignored.
    fn on_headers(&mut self, status: StatusCode, headers: &HeaderMap, resume: Resumer) -> Flow;

    fn on_body(&mut self, chunk: Bytes) -> Flow;

    /// The response finished. `trailers` is empty unless the body was chunked
    /// and carried a trailer section.
    fn on_complete(&mut self, trailers: HeaderMap);

    /// The server switched protocols, or accepted a `CONNECT`. The socket now
    /// belongs to the handler.
    fn on_upgrade(&mut self, status: StatusCode, headers: HeaderMap, socket: Upgraded) {
        let _ = (status, headers, socket);
        self.on_error(ClientError::protocol("unexpected upgrade"));
    }

    fn on_error(&mut self, error: ClientError);
}
