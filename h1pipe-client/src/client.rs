//! Client handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::config::RequestOptions;
use crate::dispatcher::{
    ClientStats, Command, ConnectionEvent, Dispatcher, Phase, RequestId, RequestRecord, Settings,
    Shared,
};
use crate::handler::Handler;

const EVENT_CAPACITY: usize = 16;

/// Pipelined HTTP/1.1 client for a single origin.
///
/// A `Client` owns one connection. Requests are queued in order, written
/// up to the configured pipelining depth, and matched to responses in the
/// order they were written. The handle is cheap to clone; all clones drive
/// the same connection.
///
/// # Example
///
/// ```ignore
/// use h1pipe_client::{Client, RequestOptions};
///
/// let client = Client::builder("http://localhost:3000").pipelining(4).build()?;
/// let response = client.request(RequestOptions::get("/health")).await?;
/// assert_eq!(response.status, 200);
/// let body = response.body.collect().await?;
/// client.close().await?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    stats: watch::Receiver<ClientStats>,
    events: broadcast::Sender<ConnectionEvent>,
    host_header: String,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Close(None));
    }
}

/// Handle to a dispatched request.
#[derive(Clone)]
pub struct RequestHandle {
    id: RequestId,
    tx: mpsc::UnboundedSender<Command>,
}

impl RequestHandle {
    /// Abort the request.
    ///
    /// A request still waiting in the queue fails with
    /// [`ClientError::RequestAborted`] without touching the socket. A
    /// request already written tears the connection down. Aborting a request
    /// that already finished does nothing.
    pub fn abort(&self) {
        let _ = self.tx.send(Command::Abort(self.id));
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}

impl Client {
    pub fn builder<S: Into<String>>(url: S) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub(crate) fn start(
        settings: Settings,
        host_header: String,
        request_timeout: Duration,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(settings.pipelining));
        let (stats_tx, stats_rx) = watch::channel(ClientStats::initial(settings.pipelining));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let dispatcher = Dispatcher::new(
            settings,
            tx.clone(),
            rx,
            Arc::clone(&shared),
            stats_tx,
            events.clone(),
        );
        runtime.spawn(dispatcher.run());

        Self {
            inner: Arc::new(ClientInner {
                tx,
                shared,
                stats: stats_rx,
                events,
                host_header,
                request_timeout,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a request and receive its outcome through `handler`.
    ///
    /// Fails synchronously with [`ClientError::InvalidArgument`] for
    /// malformed options, and with [`ClientError::ClientClosed`] or
    /// [`ClientError::ClientDestroyed`] after shutdown. Otherwise exactly one
    /// terminal callback reaches the handler.
    pub fn dispatch<H: Handler>(
        &self,
        options: RequestOptions,
        handler: H,
    ) -> Result<RequestHandle, ClientError> {
        let shared = &self.inner.shared;
        if shared.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientDestroyed);
        }
        if shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientClosed);
        }

        let parts = options.into_parts()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = parts.request_timeout.unwrap_or(self.inner.request_timeout);
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let record = RequestRecord::new(id, parts, &self.inner.host_header, Box::new(handler), deadline);

        let barrier = record.is_barrier();
        shared.inbox.fetch_add(1, Ordering::SeqCst);
        if barrier {
            shared.inbox_barriers.fetch_add(1, Ordering::SeqCst);
        }

        if let Err(mpsc::error::SendError(command)) =
            self.inner.tx.send(Command::Dispatch(Box::new(record)))
        {
            shared.inbox.fetch_sub(1, Ordering::SeqCst);
            if barrier {
                shared.inbox_barriers.fetch_sub(1, Ordering::SeqCst);
            }
            if let Command::Dispatch(record) = command {
                record.disarm();
            }
            return Err(ClientError::ClientDestroyed);
        }

        Ok(RequestHandle {
            id,
            tx: self.inner.tx.clone(),
        })
    }

    /// Stop accepting requests and wait until every queued request finished.
    /// The connection is destroyed afterwards.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.shared.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientDestroyed);
        }
        self.inner.shared.closed.store(true, Ordering::SeqCst);

        let (reply, done) = oneshot::channel();
        if self.inner.tx.send(Command::Close(Some(reply))).is_err() {
            return Err(ClientError::ClientDestroyed);
        }
        done.await.unwrap_or(Err(ClientError::ClientDestroyed))
    }

    /// Tear the connection down now. Queued and in-flight requests fail with
    /// `reason`, or [`ClientError::ClientDestroyed`] when none is given.
    pub async fn destroy(&self, reason: Option<ClientError>) {
        self.inner.shared.closed.store(true, Ordering::SeqCst);
        self.inner.shared.destroyed.store(true, Ordering::SeqCst);

        let (reply, done) = oneshot::channel();
        if self.inner.tx.send(Command::Destroy(reason, reply)).is_ok() {
            let _ = done.await;
        }
    }

    /// Change the pipelining depth. Takes effect on the next write.
    pub fn set_pipelining(&self, depth: usize) -> Result<(), ClientError> {
        if depth == 0 {
            return Err(ClientError::invalid_argument("invalid pipelining"));
        }
        self.inner.shared.pipelining.store(depth, Ordering::SeqCst);
        let _ = self.inner.tx.send(Command::SetPipelining(depth));
        Ok(())
    }

    pub fn pipelining(&self) -> usize {
        self.inner.shared.pipelining.load(Ordering::SeqCst)
    }

    /// Requests queued but not yet written. Includes requests dispatched
    /// from this handle that the connection task has not picked up yet.
    pub fn pending(&self) -> usize {
        self.inner.stats.borrow().pending + self.inner.shared.inbox.load(Ordering::SeqCst)
    }

    /// Requests written and awaiting their response.
    pub fn running(&self) -> usize {
        self.inner.stats.borrow().running
    }

    pub fn size(&self) -> usize {
        self.inner.stats.borrow().size + self.inner.shared.inbox.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> bool {
        self.inner.stats.borrow().connected
    }

    /// Returns true when a new request would not be written right away.
    pub fn busy(&self) -> bool {
        let stats = self.inner.stats.borrow();
        let pipelining = self.pipelining();
        let inbox = self.inner.shared.inbox.load(Ordering::SeqCst);
        stats.busy
            || stats.running >= pipelining
            || stats.pending + inbox >= pipelining
            || self.inner.shared.inbox_barriers.load(Ordering::SeqCst) > 0
    }

    pub fn closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> bool {
        self.inner.shared.destroyed.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        self.inner.stats.borrow().phase
    }

    /// Latest published snapshot.
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.borrow().clone()
    }

    /// Watch snapshots as they are published.
    pub fn watch_stats(&self) -> watch::Receiver<ClientStats> {
        self.inner.stats.clone()
    }

    /// Receive connect and disconnect notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.inner.host_header)
            .field("stats", &*self.inner.stats.borrow())
            .finish_non_exhaustive()
    }
}
