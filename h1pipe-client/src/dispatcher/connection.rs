//! State owned while a socket is open.

use std::time::Duration;

use bytes::BytesMut;
use h1pipe_core::{BodyEncoder, ResponseParser};
use http::StatusCode;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::time::Instant;

use super::record::RequestId;
use crate::transport::{BodyStream, BoxIo};

/// Stop pulling body chunks while this many bytes wait to be written.
pub(super) const HIGH_WATER_MARK: usize = 64 * 1024;

/// Inactivity timer whose duration changes between the socket timeout while
/// requests are on the wire and the keep-alive timeout while idle.
#[derive(Debug)]
pub(super) struct SocketTimer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl SocketTimer {
    pub(super) fn new(duration: Duration) -> Self {
        let mut timer = Self {
            duration,
            deadline: None,
        };
        timer.touch();
        timer
    }

    pub(super) fn duration(&self) -> Duration {
        self.duration
    }

    /// Switch duration and restart.
    pub(super) fn arm(&mut self, duration: Duration) {
        self.duration = duration;
        self.touch();
    }

    /// Restart after socket activity. A zero duration disables the timer.
    pub(super) fn touch(&mut self) {
        self.deadline = if self.duration.is_zero() {
            None
        } else {
            Some(Instant::now() + self.duration)
        };
    }

    pub(super) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// A streaming body being copied onto the socket.
pub(super) struct BodyWrite {
    pub(super) id: RequestId,
    pub(super) stream: BodyStream,
    pub(super) encoder: BodyEncoder,
    pub(super) expects_payload: bool,
}

pub(super) struct Connection {
    pub(super) reader: ReadHalf<BoxIo>,
    pub(super) writer: WriteHalf<BoxIo>,
    pub(super) parser: ResponseParser,
    /// Encoded request bytes not yet accepted by the socket.
    pub(super) out: BytesMut,
    pub(super) needs_flush: bool,
    pub(super) writing: Option<BodyWrite>,
    pub(super) read_paused: bool,
    pub(super) timer: SocketTimer,
    pub(super) headers_deadline: Option<Instant>,
    /// Status of the response head currently being read.
    pub(super) status: Option<StatusCode>,
    /// Response bytes dropped for abandoned requests since the last
    /// complete message.
    pub(super) discarded: u64,
}

impl Connection {
    /// The timer starts with `idle_timeout` and switches to the socket
    /// timeout on the first write.
    pub(super) fn new(io: BoxIo, max_header_size: usize, idle_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader,
            writer,
            parser: ResponseParser::new(max_header_size),
            out: BytesMut::with_capacity(8 * 1024),
            needs_flush: false,
            writing: None,
            read_paused: false,
            timer: SocketTimer::new(idle_timeout),
            headers_deadline: None,
            status: None,
            discarded: 0,
        }
    }

    pub(super) fn is_writing(&self) -> bool {
        self.writing.is_some()
    }

    pub(super) fn can_pull_body(&self) -> bool {
        self.out.len() < HIGH_WATER_MARK
    }
}
