//! Connection manager.
//!
//! A single task owns the socket, the pipeline queue and every timer. The
//! [`Client`](crate::Client) talks to it over an unbounded command channel
//! and observes it through a `watch` snapshot and a `broadcast` of
//! connection events.
//!
//! All state changes request a resume pass. Passes run in a loop after each
//! event until nothing asks for another one, so a long queue never recurses.

mod connection;
mod queue;
mod record;
mod stats;

use std::future::pending;
use std::io;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use futures::future::BoxFuture;
use h1pipe_core::{
    BodyEncoder, BodyShape, HeadDecision, KeepAlive, ParseEvent, RequestHead, ResponseHead,
    ResponseParser, encode_fixed_body, expects_payload, forces_reset, negotiate_keep_alive,
    plan_framing,
};
use http::header::{HeaderName, UPGRADE};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::ClientError;
use crate::config::{ReconnectBackoff, ReconnectPolicy};
use crate::handler::{Flow, Resumer};
use crate::transport::{BoxIo, Connect, ConnectTarget, RequestBody, Upgraded};
use connection::{BodyWrite, Connection};
use queue::{PipelineQueue, Segment};

pub(crate) use record::{RequestId, RequestRecord};
pub use stats::{ClientStats, ConnectionEvent, Phase};

pub(crate) enum Command {
    Dispatch(Box<RequestRecord>),
    Abort(RequestId),
    Resume(RequestId),
    SetPipelining(usize),
    /// `None` when the last client handle is dropped.
    Close(Option<oneshot::Sender<Result<(), ClientError>>>),
    Destroy(Option<ClientError>, oneshot::Sender<()>),
}

/// Counters the client handles read without a round trip to the task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) closed: AtomicBool,
    pub(crate) destroyed: AtomicBool,
    pub(crate) pipelining: AtomicUsize,
    /// Dispatched records not yet picked up by the task.
    pub(crate) inbox: AtomicUsize,
    /// Of those, records that block pipelining.
    pub(crate) inbox_barriers: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(pipelining: usize) -> Self {
        Self {
            closed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            pipelining: AtomicUsize::new(pipelining),
            inbox: AtomicUsize::new(0),
            inbox_barriers: AtomicUsize::new(0),
        }
    }
}

/// Validated client configuration.
pub(crate) struct Settings {
    pub(crate) target: ConnectTarget,
    pub(crate) connector: Arc<dyn Connect>,
    pub(crate) pipelining: usize,
    pub(crate) max_header_size: usize,
    pub(crate) headers_timeout: Duration,
    pub(crate) socket_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_keep_alive_timeout: Duration,
    pub(crate) keep_alive_timeout_threshold: Duration,
    pub(crate) max_aborted_payload: u64,
    pub(crate) reconnect: ReconnectPolicy,
}

enum Event {
    Command(Option<Command>),
    Connected(Result<BoxIo, ClientError>),
    RetryElapsed,
    Read(io::Result<usize>),
    Written(io::Result<usize>),
    Flushed(io::Result<()>),
    BodyChunk(Option<Result<Bytes, ClientError>>),
    SocketTimeout,
    HeadersTimeout,
    RequestDeadline,
}

pub(crate) struct Dispatcher {
    settings: Settings,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    stats: watch::Sender<ClientStats>,
    events: broadcast::Sender<ConnectionEvent>,

    queue: PipelineQueue,
    pipelining: usize,
    conn: Option<Connection>,
    connecting: Option<BoxFuture<'static, Result<BoxIo, ClientError>>>,
    retry_at: Option<Instant>,
    backoff: ReconnectBackoff,
    /// Servername requested by the records on the current socket. `None`
    /// connects with the configured default.
    servername: Option<String>,
    keep_alive_timeout: Duration,
    reset: bool,
    closed: bool,
    destroyed: bool,
    close_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    destroy_waiters: Vec<oneshot::Sender<()>>,
    resume_requested: bool,
    defer_resume: bool,
    /// Set while tearing down the socket for an aborted request that is not
    /// the head, so a retryable head is requeued instead of failed.
    spare_head: bool,
    received: usize,
    received_barriers: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        settings: Settings,
        tx: mpsc::UnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
        shared: Arc<Shared>,
        stats: watch::Sender<ClientStats>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let backoff = settings.reconnect.backoff(settings.socket_timeout);
        Self {
            pipelining: settings.pipelining,
            keep_alive_timeout: settings.idle_timeout,
            servername: None,
            settings,
            rx,
            tx,
            shared,
            stats,
            events,
            queue: PipelineQueue::new(),
            conn: None,
            connecting: None,
            retry_at: None,
            backoff,
            reset: false,
            closed: false,
            destroyed: false,
            close_waiters: Vec::new(),
            destroy_waiters: Vec::new(),
            resume_requested: false,
            defer_resume: false,
            spare_head: false,
            received: 0,
            received_barriers: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(
            host = %self.settings.target.host,
            port = self.settings.target.port,
            pipelining = self.pipelining,
            "connection manager started"
        );

        loop {
            if mem::take(&mut self.defer_resume) {
                // Give a streaming body's producer one scheduler tick
                // before the request is written.
                tokio::task::yield_now().await;
                self.drain_commands();
                self.resume_requested = true;
            }
            while mem::take(&mut self.resume_requested) {
                self.resume();
            }
            self.publish();

            if self.destroyed && self.queue.size() == 0 {
                break;
            }

            let event = self.next_event().await;
            self.handle_event(event);
        }

        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        for waiter in self.destroy_waiters.drain(..) {
            let _ = waiter.send(());
        }

        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            self.reject(command);
        }
        tracing::debug!("connection manager stopped");
    }

    async fn next_event(&mut self) -> Event {
        let request_deadline = self.queue.earliest_deadline();
        let (read, write, body, socket_deadline, headers_deadline) = match self.conn.as_mut() {
            Some(conn) => {
                let can_pull = conn.can_pull_body();
                (
                    (!conn.read_paused).then_some((&mut conn.reader, &mut conn.parser)),
                    Some((&mut conn.writer, &conn.out, conn.needs_flush)),
                    conn.writing.as_mut().filter(|_| can_pull),
                    conn.timer.deadline(),
                    conn.headers_deadline,
                )
            }
            None => (None, None, None, None, None),
        };

        tokio::select! {
            command = self.rx.recv() => Event::Command(command),
            result = connect_done(self.connecting.as_mut()) => Event::Connected(result),
            _ = sleep_until(self.retry_at) => Event::RetryElapsed,
            result = read_some(read) => Event::Read(result),
            event = write_some(write) => event,
            chunk = next_chunk(body) => Event::BodyChunk(chunk),
            _ = sleep_until(socket_deadline) => Event::SocketTimeout,
            _ = sleep_until(headers_deadline) => Event::HeadersTimeout,
            _ = sleep_until(request_deadline) => Event::RequestDeadline,
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(Some(command)) => {
                self.on_command(command);
                self.drain_commands();
            }
            Event::Command(None) => self.destroy_client(None),
            Event::Connected(result) => {
                self.connecting = None;
                self.on_connect(result);
            }
            Event::RetryElapsed => {
                self.retry_at = None;
                self.connect();
            }
            Event::Read(result) => self.on_read(result),
            Event::Written(result) => self.on_written(result),
            Event::Flushed(result) => match result {
                Ok(()) => {
                    if let Some(conn) = self.conn.as_mut() {
                        conn.needs_flush = false;
                    }
                }
                Err(err) => self.destroy_socket(err.into()),
            },
            Event::BodyChunk(chunk) => self.on_body_chunk(chunk),
            Event::SocketTimeout => self.on_socket_timeout(),
            Event::HeadersTimeout => {
                tracing::debug!("headers timeout");
                self.destroy_socket(ClientError::HeadersTimeout);
            }
            Event::RequestDeadline => self.on_request_deadline(),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            self.on_command(command);
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Dispatch(record) => {
                self.received += 1;
                if record.is_barrier() {
                    self.received_barriers += 1;
                }
                if self.destroyed {
                    let mut record = *record;
                    record.fail(ClientError::ClientDestroyed);
                    return;
                }
                tracing::trace!(id = record.id, method = %record.method, path = %record.path, "request queued");
                let stream = record.has_stream_body();
                self.queue.push(*record);
                if stream {
                    self.defer_resume = true;
                } else {
                    self.resume_requested = true;
                }
            }
            Command::Abort(id) => self.abort(id),
            Command::Resume(id) => self.resume_reading(id),
            Command::SetPipelining(pipelining) => {
                self.pipelining = pipelining;
                self.resume_requested = true;
            }
            Command::Close(reply) => {
                if self.destroyed {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(ClientError::ClientDestroyed));
                    }
                    return;
                }
                self.closed = true;
                self.shared.closed.store(true, Ordering::SeqCst);
                self.close_waiters.extend(reply);
                self.resume_requested = true;
            }
            Command::Destroy(reason, reply) => {
                self.destroy_waiters.push(reply);
                self.destroy_client(reason);
            }
        }
    }

    fn reject(&mut self, command: Command) {
        match command {
            Command::Dispatch(record) => {
                let mut record = *record;
                record.fail(ClientError::ClientDestroyed);
                self.shared.inbox.fetch_sub(1, Ordering::SeqCst);
                if record.is_barrier() {
                    self.shared.inbox_barriers.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Command::Close(Some(reply)) => {
                let _ = reply.send(Err(ClientError::ClientDestroyed));
            }
            Command::Destroy(_, reply) => {
                let _ = reply.send(());
            }
            Command::Abort(_)
            | Command::Resume(_)
            | Command::SetPipelining(_)
            | Command::Close(None) => {}
        }
    }

    // ---- resume ----------------------------------------------------------

    fn resume(&mut self) {
        loop {
            if self.destroyed {
                for mut record in self.queue.drain_pending() {
                    record.on_error(ClientError::ClientDestroyed);
                }
                return;
            }

            if self.queue.size() == 0 {
                if self.closed {
                    self.destroy_client(None);
                    return;
                }
                let keep_alive = self.keep_alive_timeout;
                if let Some(conn) = self.conn.as_mut() {
                    if conn.timer.duration() != keep_alive {
                        conn.timer.arm(keep_alive);
                    }
                }
                self.queue.reset_if_drained();
                return;
            }

            self.queue.compact();

            if self.queue.running() >= self.pipelining || self.queue.pending() == 0 {
                return;
            }

            let Some(head) = self.queue.head_pending() else {
                return;
            };

            if head.is_aborted() {
                self.queue.remove_head_pending();
                continue;
            }
            if head.is_settled() {
                // Requeued after its deadline passed while on the wire.
                if let Some(record) = self.queue.remove_head_pending() {
                    record.disarm();
                }
                continue;
            }

            if head.servername != self.servername {
                if self.queue.running() > 0 {
                    return;
                }
                self.servername = head.servername.clone();
                if self.conn.is_some() || self.connecting.is_some() {
                    self.destroy_socket(ClientError::informational("servername changed"));
                    return;
                }
            }

            if self.conn.is_none() {
                if self.connecting.is_none() && self.retry_at.is_none() {
                    self.schedule_connect();
                }
                return;
            }

            if self.conn.as_ref().is_some_and(Connection::is_writing) || self.reset {
                return;
            }

            let Some(head) = self.queue.head_pending() else {
                return;
            };
            if self.queue.running() > 0
                && (!head.idempotent || head.has_stream_body() || head.is_upgrade())
            {
                return;
            }

            self.write_head_pending();
        }
    }

    fn schedule_connect(&mut self) {
        let delay = self.backoff.next_delay();
        if delay.is_zero() {
            self.connect();
        } else {
            tracing::debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempts(),
                "reconnecting after backoff"
            );
            self.retry_at = Some(Instant::now() + delay);
        }
    }

    fn connect(&mut self) {
        if self.destroyed || self.conn.is_some() || self.connecting.is_some() {
            return;
        }

        let target = ConnectTarget {
            servername: self
                .servername
                .clone()
                .or_else(|| self.settings.target.servername.clone()),
            ..self.settings.target.clone()
        };
        tracing::debug!(
            host = %target.host,
            port = target.port,
            servername = target.servername.as_deref(),
            "connecting"
        );

        let connector = Arc::clone(&self.settings.connector);
        let timeout = self.settings.socket_timeout;
        self.connecting = Some(Box::pin(async move {
            let attempt = connector.connect(target);
            if timeout.is_zero() {
                attempt.await
            } else {
                tokio::time::timeout(timeout, attempt)
                    .await
                    .unwrap_or(Err(ClientError::SocketTimeout))
            }
        }));
    }

    fn on_connect(&mut self, result: Result<BoxIo, ClientError>) {
        match result {
            Ok(io) => {
                tracing::debug!("connected");
                self.conn = Some(Connection::new(
                    io,
                    self.settings.max_header_size,
                    self.settings.idle_timeout,
                ));
                self.reset = false;
                self.keep_alive_timeout = self.settings.idle_timeout;
                self.backoff.reset();
                let _ = self.events.send(ConnectionEvent::Connected);
                self.resume_requested = true;
            }
            Err(err) => {
                tracing::debug!(error = %err, "connect failed");
                self.on_socket_error(&err);
                self.on_socket_close(err);
            }
        }
    }

    // ---- writing ---------------------------------------------------------

    fn write_head_pending(&mut self) {
        let (Some(conn), Some(record)) = (self.conn.as_mut(), self.queue.head_pending_mut()) else {
            return;
        };

        let shape = match &record.body {
            RequestBody::Empty => BodyShape::None,
            RequestBody::Full(data) => BodyShape::Buffer(data.len() as u64),
            RequestBody::Streaming(_) => BodyShape::Stream,
        };
        let framing = match plan_framing(&record.method, shape, record.content_length) {
            Ok(framing) => framing,
            Err(err) => {
                tracing::debug!(id = record.id, error = %err, "request rejected before write");
                record.fail(err.into());
                return;
            }
        };

        let mark = conn.out.len();
        RequestHead {
            method: &record.method,
            path: &record.path,
            host: Some(&record.host),
            headers: &record.headers,
            upgrade: record.upgrade.as_deref(),
        }
        .encode(&mut conn.out);

        let expects = expects_payload(&record.method);
        let mut reset = forces_reset(&record.method) || record.upgrade.is_some();

        if let Some(stream) = record.take_stream() {
            conn.writing = Some(BodyWrite {
                id: record.id,
                stream,
                encoder: BodyEncoder::new(&record.method, framing),
                expects_payload: expects,
            });
        } else {
            let data = match &record.body {
                RequestBody::Full(data) => data.clone(),
                _ => Bytes::new(),
            };
            if let Err(err) = encode_fixed_body(framing, &data, &mut conn.out) {
                conn.out.truncate(mark);
                record.fail(err.into());
                return;
            }
            if !data.is_empty() {
                reset |= !expects;
            }
        }

        tracing::trace!(id = record.id, method = %record.method, path = %record.path, "request written");
        conn.needs_flush = true;
        conn.timer.arm(self.settings.socket_timeout);
        if reset {
            self.reset = true;
        }

        self.queue.mark_written();
        if self.queue.running() == 1 {
            conn.headers_deadline = deadline_after(self.settings.headers_timeout);
        }
    }

    fn on_body_chunk(&mut self, chunk: Option<Result<Bytes, ClientError>>) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let Some(write) = conn.writing.as_mut() else {
            return;
        };

        let result = match chunk {
            Some(Ok(chunk)) => {
                let first = write.encoder.bytes_written() == 0 && !chunk.is_empty();
                match write.encoder.encode_chunk(&chunk, &mut conn.out) {
                    Ok(()) => {
                        if first && !write.expects_payload {
                            self.reset = true;
                        }
                        conn.needs_flush = true;
                        conn.timer.touch();
                        return;
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Some(Err(err)) => Err(err),
            None => write.encoder.finish(&mut conn.out).map_err(ClientError::from),
        };

        let id = write.id;
        conn.writing = None;
        match result {
            Ok(()) => {
                tracing::trace!(id, "request body finished");
                conn.needs_flush = true;
                self.resume_requested = true;
            }
            Err(err) => {
                tracing::debug!(id, error = %err, "request body failed");
                self.destroy_socket(err);
            }
        }
    }

    fn on_written(&mut self, result: io::Result<usize>) {
        match result {
            Ok(0) => self.destroy_socket(ClientError::socket("socket closed while writing")),
            Ok(n) => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.out.advance(n);
                    conn.timer.touch();
                }
            }
            Err(err) => self.destroy_socket(err.into()),
        }
    }

    // ---- reading ---------------------------------------------------------

    fn on_read(&mut self, result: io::Result<usize>) {
        match result {
            Ok(0) => self.on_eof(),
            Ok(_) => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.timer.touch();
                }
                self.drain_parser();
            }
            Err(err) => self.destroy_socket(err.into()),
        }
    }

    fn on_eof(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        match conn.parser.finish_eof() {
            Ok(Some(event)) => {
                if !self.on_parse_event(event) {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(error = %err, "socket closed mid-response"),
        }
        self.destroy_socket(ClientError::socket("other side closed"));
    }

    fn drain_parser(&mut self) {
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            if conn.read_paused {
                return;
            }
            match conn.parser.poll_event() {
                Ok(Some(event)) => {
                    if !self.on_parse_event(event) {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "invalid response");
                    self.destroy_socket(err.into());
                    return;
                }
            }
        }
    }

    /// Returns false when parsing must stop, because reading was paused or
    /// the socket is gone.
    fn on_parse_event(&mut self, event: ParseEvent) -> bool {
        match event {
            ParseEvent::Head(head) => self.on_response_head(head),
            ParseEvent::Body(chunk) => self.on_response_body(chunk),
            ParseEvent::Complete(trailers) => self.on_response_complete(trailers),
        }
    }

    fn on_response_head(&mut self, head: ResponseHead) -> bool {
        let Some(record) = self.queue.head_running() else {
            self.destroy_socket(ClientError::protocol("response without a request"));
            return false;
        };
        let id = record.id;
        let is_connect = record.method == Method::CONNECT;
        let is_head = record.method == Method::HEAD;
        let expects_upgrade = record.is_upgrade();

        let upgraded = head.upgrade || is_connect;
        if upgraded != expects_upgrade {
            self.destroy_socket(ClientError::protocol("bad upgrade"));
            return false;
        }
        if upgraded {
            if !is_connect && !head.headers.contains_key(UPGRADE) {
                self.destroy_socket(ClientError::protocol("missing upgrade header"));
                return false;
            }
            self.hand_off_upgrade(head);
            return false;
        }

        if !head.keep_alive {
            self.reset = true;
        }
        match negotiate_keep_alive(
            head.headers.get(HeaderName::from_static("keep-alive")),
            self.settings.idle_timeout,
            self.settings.keep_alive_timeout_threshold,
            self.settings.max_keep_alive_timeout,
        ) {
            KeepAlive::Timeout(timeout) => self.keep_alive_timeout = timeout,
            KeepAlive::Unchanged => {}
            KeepAlive::Reset => self.reset = true,
        }

        if head.status == StatusCode::CONTINUE {
            self.destroy_socket(ClientError::protocol("bad response: unexpected 100 continue"));
            return false;
        }

        let informational = head.status.is_informational();
        let resumer = Resumer::new(self.tx.clone(), id);
        let flow = match self.queue.head_running_mut() {
            Some(record) => record.on_headers(head.status, &head.headers, resumer),
            None => Flow::Discard,
        };

        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        conn.parser.decide(if informational || is_head {
            HeadDecision::SkipBody
        } else {
            HeadDecision::Body
        });
        conn.status = Some(head.status);
        if informational {
            return true;
        }

        conn.headers_deadline = None;
        conn.discarded = 0;
        if flow == Flow::Pause {
            conn.read_paused = true;
            return false;
        }
        true
    }

    fn on_response_body(&mut self, chunk: Bytes) -> bool {
        let len = chunk.len() as u64;
        let flow = match self.queue.head_running_mut() {
            Some(record) => record.on_body(chunk),
            None => {
                self.destroy_socket(ClientError::protocol("response without a request"));
                return false;
            }
        };

        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        match flow {
            Flow::Continue => true,
            Flow::Pause => {
                conn.read_paused = true;
                false
            }
            Flow::Discard => {
                conn.discarded += len;
                if conn.discarded > self.settings.max_aborted_payload {
                    self.destroy_socket(ClientError::informational("max aborted payload"));
                    return false;
                }
                true
            }
        }
    }

    fn on_response_complete(&mut self, trailers: HeaderMap) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        if conn.status.take().is_some_and(|status| status.is_informational()) {
            return true;
        }

        let Some(mut record) = self.queue.complete_head() else {
            self.destroy_socket(ClientError::protocol("response without a request"));
            return false;
        };
        tracing::trace!(id = record.id, "response complete");
        record.on_complete(trailers);
        drop(record);

        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        conn.discarded = 0;
        if conn.is_writing() || self.reset {
            self.destroy_socket(ClientError::informational("request reset"));
            return false;
        }
        if self.queue.running() > 0 {
            conn.headers_deadline = deadline_after(self.settings.headers_timeout);
        }
        self.resume_requested = true;
        true
    }

    fn hand_off_upgrade(&mut self, head: ResponseHead) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let read_prefix = conn.parser.decide(HeadDecision::Upgrade);
        let write_prefix = conn.out.split().freeze();
        let io = conn.reader.unsplit(conn.writer);
        let socket = Upgraded::new(io, read_prefix, write_prefix);

        if let Some(mut record) = self.queue.complete_head() {
            tracing::debug!(id = record.id, status = head.status.as_u16(), "connection upgraded");
            record.on_upgrade(head.status, head.headers, socket);
        }
        let _ = self
            .events
            .send(ConnectionEvent::Disconnected(ClientError::informational("upgrade")));
        self.resume_requested = true;
    }

    fn resume_reading(&mut self, id: RequestId) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if !conn.read_paused || self.queue.head_running().map(|r| r.id) != Some(id) {
            return;
        }
        conn.read_paused = false;
        conn.timer.touch();
        self.drain_parser();
    }

    // ---- timers ----------------------------------------------------------

    fn on_socket_timeout(&mut self) {
        match self.queue.head_running().map(RequestRecord::headers_received) {
            None => {
                tracing::debug!("socket idle timeout");
                self.destroy_socket(ClientError::SocketTimeout);
            }
            Some(false) => {
                tracing::debug!("socket timeout before response headers");
                self.destroy_socket(ClientError::HeadersTimeout);
            }
            Some(true) => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.timer.touch();
                }
            }
        }
    }

    fn on_request_deadline(&mut self) {
        let now = Instant::now();
        self.queue.for_each_live(|record, running| {
            if !record.timed_out(now) {
                return;
            }
            tracing::debug!(id = record.id, running, "request timeout");
            if running {
                record.abandon(ClientError::RequestTimeout);
            } else {
                record.fail(ClientError::RequestTimeout);
            }
        });
        self.resume_requested = true;
    }

    // ---- abort / teardown ------------------------------------------------

    fn abort(&mut self, id: RequestId) {
        match self.queue.locate(id) {
            Some(Segment::Pending) => {
                if let Some(record) = self.queue.find_mut(id) {
                    tracing::trace!(id, "pending request aborted");
                    record.fail(ClientError::RequestAborted);
                }
                self.resume_requested = true;
            }
            Some(Segment::Running) => {
                let head_id = self.queue.head_running().map(|r| r.id);
                if let Some(record) = self.queue.find_mut(id) {
                    if record.is_settled() {
                        return;
                    }
                    tracing::trace!(id, "running request aborted");
                    record.fail(ClientError::RequestAborted);
                }
                self.spare_head = head_id != Some(id);
                self.destroy_socket(ClientError::informational("request aborted"));
                self.spare_head = false;
            }
            None => {}
        }
    }

    fn destroy_socket(&mut self, err: ClientError) {
        let was_connecting = self.connecting.take().is_some();
        let Some(conn) = self.conn.take() else {
            if was_connecting {
                tracing::debug!(error = %err, "connection attempt cancelled");
                self.on_socket_close(err);
            }
            return;
        };
        drop(conn);

        tracing::debug!(error = %err, "socket destroyed");
        self.on_socket_error(&err);
        self.on_socket_close(err);
    }

    fn on_socket_error(&mut self, err: &ClientError) {
        if let ClientError::CertificateNameMismatch(_) = err {
            debug_assert_eq!(self.queue.running(), 0);
            let servername = self.servername.clone();
            self.queue.fail_pending_for(servername.as_deref(), err);
        } else if self.queue.running() == 0 && !err.is_transient() {
            for mut record in self.queue.drain_all() {
                record.on_error(err.clone());
            }
        }
    }

    fn on_socket_close(&mut self, err: ClientError) {
        self.reset = false;
        if self.queue.running() > 0 {
            let keep_head =
                self.spare_head && self.queue.head_running().is_some_and(RequestRecord::can_retry);
            if let Some(mut head) = self.queue.requeue_running(keep_head) {
                head.on_error(err.clone());
            }
        }
        if !self.destroyed {
            let _ = self.events.send(ConnectionEvent::Disconnected(err));
        }
        self.resume_requested = true;
    }

    fn destroy_client(&mut self, reason: Option<ClientError>) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.closed = true;
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.destroyed.store(true, Ordering::SeqCst);
        self.retry_at = None;

        let err = reason.unwrap_or(ClientError::ClientDestroyed);
        tracing::debug!(error = %err, "client destroyed");
        for mut record in self.queue.drain_pending() {
            record.on_error(ClientError::ClientDestroyed);
        }
        self.destroy_socket(err);
        self.resume_requested = true;
    }

    // ---- observation -----------------------------------------------------

    fn publish(&mut self) {
        let conn = self.conn.as_ref();
        let writing = conn.is_some_and(Connection::is_writing);
        let running = self.queue.running();
        let pending = self.queue.pending();
        let stats = ClientStats {
            pending,
            running,
            size: self.queue.size(),
            connected: conn.is_some(),
            busy: self.reset
                || writing
                || running >= self.pipelining
                || pending >= self.pipelining,
            pipelining: self.pipelining,
            phase: self.phase(),
        };
        self.stats.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });

        if self.received > 0 {
            self.shared.inbox.fetch_sub(self.received, Ordering::SeqCst);
            self.received = 0;
        }
        if self.received_barriers > 0 {
            self.shared
                .inbox_barriers
                .fetch_sub(self.received_barriers, Ordering::SeqCst);
            self.received_barriers = 0;
        }
    }

    fn phase(&self) -> Phase {
        if self.destroyed {
            return Phase::Destroyed;
        }
        if self.closed {
            return Phase::Closing;
        }
        match self.conn.as_ref() {
            None if self.connecting.is_some() || self.retry_at.is_some() => Phase::Connecting,
            None => Phase::Disconnected,
            Some(conn) if conn.is_writing() => Phase::Writing,
            Some(_) if self.queue.running() > 0 => Phase::AwaitingResponse,
            Some(_) => Phase::Idle,
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Some(Instant::now() + timeout)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn connect_done(
    attempt: Option<&mut BoxFuture<'static, Result<BoxIo, ClientError>>>,
) -> Result<BoxIo, ClientError> {
    match attempt {
        Some(attempt) => attempt.await,
        None => pending().await,
    }
}

async fn read_some(io: Option<(&mut ReadHalf<BoxIo>, &mut ResponseParser)>) -> io::Result<usize> {
    match io {
        Some((reader, parser)) => reader.read_buf(parser.read_buf()).await,
        None => pending().await,
    }
}

async fn write_some(io: Option<(&mut WriteHalf<BoxIo>, &BytesMut, bool)>) -> Event {
    match io {
        Some((writer, out, _)) if !out.is_empty() => Event::Written(writer.write(&out[..]).await),
        Some((writer, _, true)) => Event::Flushed(writer.flush().await),
        _ => pending().await,
    }
}

async fn next_chunk(write: Option<&mut BodyWrite>) -> Option<Result<Bytes, ClientError>> {
    match write {
        Some(write) => write.stream.next().await,
        None => pending().await,
    }
}
