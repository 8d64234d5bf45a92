use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::ClientError;
use crate::client::{Client, RequestHandle};
use crate::config::{Opaque, RequestOptions};
use crate::handler::{Flow, Handler, Resumer};
use super::AbortOnDrop;

/// Pause the socket once this many body bytes wait unread.
const HIGH_WATER_MARK: usize = 64 * 1024;
/// Resume once the reader drained down to this.
const LOW_WATER_MARK: usize = 16 * 1024;

/// A response whose head arrived.
pub struct ResponseData {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub opaque: Option<Opaque>,
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseData")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

enum BodyEvent {
    Data(Bytes),
    End(HeaderMap),
    Error(ClientError),
}

/// Read-side backpressure shared by the handler and the body reader.
#[derive(Default)]
struct BodyFlow {
    buffered: AtomicUsize,
    paused: AtomicBool,
    closed: AtomicBool,
    resumer: OnceLock<Resumer>,
}

impl BodyFlow {
    /// Account for a delivered chunk and decide whether reading continues.
    fn produced(&self, len: usize) -> Flow {
        let buffered = self.buffered.fetch_add(len, Ordering::SeqCst) + len;
        if buffered < HIGH_WATER_MARK {
            return Flow::Continue;
        }
        self.paused.store(true, Ordering::SeqCst);
        // The reader may have drained in between.
        if self.buffered.load(Ordering::SeqCst) <= LOW_WATER_MARK
            && self.paused.swap(false, Ordering::SeqCst)
        {
            return Flow::Continue;
        }
        Flow::Pause
    }

    fn consumed(&self, len: usize) {
        let buffered = self.buffered.fetch_sub(len, Ordering::SeqCst).saturating_sub(len);
        if buffered <= LOW_WATER_MARK {
            self.wake();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn wake(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            if let Some(resumer) = self.resumer.get() {
                resumer.resume();
            }
        }
    }
}

/// Response body chunks, followed by trailers once the stream ends.
///
/// Dropping the body before the end discards the rest of the response. The
/// connection stays usable unless more than `max_aborted_payload` bytes are
/// left.
pub struct ResponseBody {
    rx: mpsc::UnboundedReceiver<BodyEvent>,
    flow: Arc<BodyFlow>,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl ResponseBody {
    /// Trailers, available after the stream returned `None`.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    pub fn is_end_stream(&self) -> bool {
        self.done
    }

    /// Read the whole body.
    pub async fn collect(self) -> Result<Bytes, ClientError> {
        self.collect_with_trailers().await.map(|(body, _)| body)
    }

    pub async fn collect_with_trailers(mut self) -> Result<(Bytes, HeaderMap), ClientError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok((buf.freeze(), self.trailers.take().unwrap_or_default()))
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let event = ready!(self.rx.poll_recv(cx));
        match event {
            Some(BodyEvent::Data(chunk)) => {
                self.flow.consumed(chunk.len());
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(BodyEvent::End(trailers)) => {
                self.done = true;
                self.trailers = Some(trailers);
                Poll::Ready(None)
            }
            Some(BodyEvent::Error(err)) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.done = true;
                Poll::Ready(Some(Err(ClientError::ClientDestroyed)))
            }
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if !self.done {
            self.flow.close();
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("buffered", &self.flow.buffered.load(Ordering::Relaxed))
            .field("done", &self.done)
            .finish()
    }
}

enum State {
    Waiting {
        tx: oneshot::Sender<Result<ResponseData, ClientError>>,
        opaque: Option<Opaque>,
    },
    Streaming {
        tx: mpsc::UnboundedSender<BodyEvent>,
        flow: Arc<BodyFlow>,
    },
    Done,
}

struct RequestHandler {
    state: State,
}

impl Handler for RequestHandler {
    fn on_headers(&mut self, status: StatusCode, headers: &HeaderMap, resume: Resumer) -> Flow {
        if status.is_informational() {
            return Flow::Continue;
        }
        let State::Waiting { tx, opaque } = std::mem::replace(&mut self.state, State::Done) else {
            return Flow::Discard;
        };

        let (body_tx, rx) = mpsc::unbounded_channel();
        let flow = Arc::new(BodyFlow::default());
        let _ = flow.resumer.set(resume);
        let response = ResponseData {
            status,
            headers: headers.clone(),
            body: ResponseBody {
                rx,
                flow: Arc::clone(&flow),
                trailers: None,
                done: false,
            },
            opaque,
        };
        if tx.send(Ok(response)).is_err() {
            return Flow::Discard;
        }
        self.state = State::Streaming { tx: body_tx, flow };
        Flow::Continue
    }

    fn on_body(&mut self, chunk: Bytes) -> Flow {
        let State::Streaming { tx, flow } = &self.state else {
            return Flow::Discard;
        };
        if flow.closed.load(Ordering::SeqCst) {
            return Flow::Discard;
        }
        let next = flow.produced(chunk.len());
        if tx.send(BodyEvent::Data(chunk)).is_err() {
            return Flow::Discard;
        }
        next
    }

    fn on_complete(&mut self, trailers: HeaderMap) {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Streaming { tx, .. } => {
                let _ = tx.send(BodyEvent::End(trailers));
            }
            State::Waiting { tx, .. } => {
                let _ = tx.send(Err(ClientError::protocol("response without a head")));
            }
            State::Done => {}
        }
    }

    fn on_error(&mut self, error: ClientError) {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Streaming { tx, .. } => {
                let _ = tx.send(BodyEvent::Error(error));
            }
            State::Waiting { tx, .. } => {
                let _ = tx.send(Err(error));
            }
            State::Done => {}
        }
    }
}

/// Resolves once the response head arrives.
///
/// Dropping the future before that aborts the request.
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<ResponseData, ClientError>>,
    guard: AbortOnDrop,
}

impl ResponseFuture {
    /// Abort the request. The future resolves with
    /// [`ClientError::RequestAborted`] unless the head already arrived.
    pub fn abort(&self) {
        if let Some(handle) = &self.guard.0 {
            handle.abort();
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<ResponseData, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        self.guard.disarm();
        Poll::Ready(result.unwrap_or(Err(ClientError::ClientDestroyed)))
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish_non_exhaustive()
    }
}

impl Client {
    /// Send a request and wait for the response head.
    ///
    /// ```ignore
    /// let response = client.request(RequestOptions::get("/users/1")).await?;
    /// let body = response.body.collect().await?;
    /// ```
    pub async fn request(&self, options: RequestOptions) -> Result<ResponseData, ClientError> {
        self.send(options)?.await
    }

    /// Queue a request now and return a future for its response head.
    ///
    /// Unlike [`request`](Self::request), the request is dispatched before
    /// the returned future is first polled, so several calls made in a row
    /// are pipelined in call order.
    pub fn send(&self, mut options: RequestOptions) -> Result<ResponseFuture, ClientError> {
        let (tx, rx) = oneshot::channel();
        let opaque = options.take_opaque();
        let handle: RequestHandle = self.dispatch(
            options,
            RequestHandler {
                state: State::Waiting { tx, opaque },
            },
        )?;
        Ok(ResponseFuture {
            rx,
            guard: AbortOnDrop::new(handle),
        })
    }
}
