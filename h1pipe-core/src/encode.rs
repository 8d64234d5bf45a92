//! HTTP/1.1 request serialization.
//!
//! A request is written in two steps. [`RequestHead::encode`] writes the
//! request line and the header block but leaves the block open, so the
//! framing header (`content-length` or `transfer-encoding`) can follow once
//! the body shape is known:
//!
//! ```text
//! POST /upload HTTP/1.1\r\n
//! host: example.com\r\n
//! connection: keep-alive\r\n
//! <caller headers>
//! content-length: 5\r\n        <- written by encode_fixed_body / BodyEncoder
//! \r\n
//! hello
//! ```
//!
//! Streamed bodies of unknown length use chunked transfer coding. The first
//! chunk's leading CRLF also terminates the header block:
//!
//! ```text
//! transfer-encoding: chunked\r\n
//! \r\n5\r\nhello
//! \r\n0\r\n\r\n
//! ```

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Method};

use crate::error::CodecError;
use crate::method::expects_payload;

const CRLF: &[u8] = b"\r\n";

/// Shape of a request body as seen by the framing planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// No body at all.
    None,
    /// A fully buffered body of the given length.
    Buffer(u64),
    /// A streaming source of unknown length.
    Stream,
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body. `explicit_zero` emits `content-length: 0`.
    Empty { explicit_zero: bool },
    /// `content-length` framing.
    Length(u64),
    /// `transfer-encoding: chunked` framing.
    Chunked,
}

/// Decide the framing of a request body.
///
/// The effective length is the measured length of the body, falling back to
/// the caller-declared `content-length` for streams. A declared length that
/// disagrees with a measured one is rejected before anything is written.
/// Methods that do not expect a payload never advertise a zero length.
pub fn plan_framing(
    method: &Method,
    body: BodyShape,
    declared: Option<u64>,
) -> Result<Framing, CodecError> {
    let measured = match body {
        BodyShape::None => Some(0),
        BodyShape::Buffer(len) => Some(len),
        BodyShape::Stream => None,
    };

    if let (Some(expected), Some(actual)) = (declared, measured) {
        if expected != actual {
            return Err(CodecError::ContentLengthMismatch { expected, actual });
        }
    }

    let mut length = measured.or(declared);
    if length == Some(0) && !expects_payload(method) {
        length = None;
    }

    Ok(match body {
        BodyShape::None | BodyShape::Buffer(0) => Framing::Empty {
            explicit_zero: length == Some(0),
        },
        BodyShape::Buffer(len) => Framing::Length(len),
        BodyShape::Stream => match length {
            Some(len) => Framing::Length(len),
            None => Framing::Chunked,
        },
    })
}

/// Request line and header block of one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Value of the `host` header. Omitted when `None`.
    pub host: Option<&'a str>,
    /// Caller headers, written after the connection headers.
    pub headers: &'a HeaderMap,
    /// Protocol for `connection: upgrade` requests.
    pub upgrade: Option<&'a str>,
}

impl RequestHead<'_> {
    /// Write the request line and headers, leaving the header block open.
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(64 + self.path.len() + self.headers.len() * 32);

        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.path.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");

        if let Some(host) = self.host {
            out.put_slice(b"host: ");
            out.put_slice(host.as_bytes());
            out.put_slice(CRLF);
        }

        match self.upgrade {
            Some(protocol) => {
                out.put_slice(b"connection: upgrade\r\nupgrade: ");
                out.put_slice(protocol.as_bytes());
                out.put_slice(CRLF);
            }
            None => out.put_slice(b"connection: keep-alive\r\n"),
        }

        for (name, value) in self.headers {
            out.put_slice(name.as_str().as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(CRLF);
        }
    }
}

/// Close the header block and write a fully buffered body.
pub fn encode_fixed_body(
    framing: Framing,
    body: &[u8],
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    match framing {
        Framing::Empty { explicit_zero } => {
            if explicit_zero {
                out.put_slice(b"content-length: 0\r\n\r\n");
            } else {
                out.put_slice(CRLF);
            }
        }
        Framing::Length(expected) => {
            let actual = body.len() as u64;
            if expected != actual {
                return Err(CodecError::ContentLengthMismatch { expected, actual });
            }
            write_content_length(expected, out);
            out.put_slice(body);
        }
        Framing::Chunked => {
            out.put_slice(b"transfer-encoding: chunked\r\n");
            if !body.is_empty() {
                write_chunk_prefix(body.len(), out);
                out.put_slice(body);
            }
            out.put_slice(b"\r\n0\r\n\r\n");
        }
    }
    Ok(())
}

/// Incremental writer for a streamed request body.
///
/// The framing header is deferred until the first non-empty chunk, so an
/// empty stream on a payload method still produces `content-length: 0`.
#[derive(Debug)]
pub struct BodyEncoder {
    length: Option<u64>,
    written: u64,
    expects_payload: bool,
    finished: bool,
}

impl BodyEncoder {
    pub fn new(method: &Method, framing: Framing) -> Self {
        let length = match framing {
            Framing::Empty { .. } => Some(0),
            Framing::Length(len) => Some(len),
            Framing::Chunked => None,
        };
        Self {
            length,
            written: 0,
            expects_payload: expects_payload(method),
            finished: false,
        }
    }

    /// Total body bytes written so far, excluding framing.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_chunked(&self) -> bool {
        self.length.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Frame and append one chunk of body data.
    ///
    /// Fails if the chunk would overflow a declared length. Empty chunks are
    /// ignored.
    pub fn encode_chunk(&mut self, chunk: &[u8], out: &mut BytesMut) -> Result<(), CodecError> {
        let len = chunk.len() as u64;
        if len == 0 {
            return Ok(());
        }

        if let Some(expected) = self.length {
            if self.written + len > expected {
                return Err(CodecError::ContentLengthMismatch {
                    expected,
                    actual: self.written + len,
                });
            }
        }

        if self.written == 0 {
            match self.length {
                Some(expected) => write_content_length(expected, out),
                None => out.put_slice(b"transfer-encoding: chunked\r\n"),
            }
        }

        if self.length.is_none() {
            write_chunk_prefix(chunk.len(), out);
        }

        out.put_slice(chunk);
        self.written += len;
        Ok(())
    }

    /// Write the body terminator.
    ///
    /// Fails with [`CodecError::ContentLengthMismatch`] if fewer bytes than
    /// declared were produced.
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<(), CodecError> {
        if let Some(expected) = self.length {
            if self.written != expected {
                return Err(CodecError::ContentLengthMismatch {
                    expected,
                    actual: self.written,
                });
            }
        }

        if self.written == 0 {
            if self.expects_payload || self.length.is_some() {
                out.put_slice(b"content-length: 0\r\n\r\n");
            } else {
                out.put_slice(CRLF);
            }
        } else if self.length.is_none() {
            out.put_slice(b"\r\n0\r\n\r\n");
        }

        self.finished = true;
        Ok(())
    }
}

fn write_content_length(len: u64, out: &mut BytesMut) {
    out.put_slice(b"content-length: ");
    out.put_slice(len.to_string().as_bytes());
    out.put_slice(b"\r\n\r\n");
}

fn write_chunk_prefix(len: usize, out: &mut BytesMut) {
    out.put_slice(CRLF);
    out.put_slice(format!("{len:x}").as_bytes());
    out.put_slice(CRLF);
}
