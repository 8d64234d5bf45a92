//! Incremental HTTP/1.1 response parser.
//!
//! The parser buffers raw socket bytes and yields [`ParseEvent`]s one at a
//! time. It never decides on its own what to do after a response head: the
//! caller inspects the [`ResponseHead`] and answers with a [`HeadDecision`]
//! (read the body, skip it, or stop parsing HTTP and take the socket).
//!
//! ```text
//! Head ──decide(Body)──────▶ Body* ──▶ Complete ──▶ Head
//!   │  ──decide(SkipBody)───────────▶ Complete ──▶ Head
//!   └──decide(Upgrade)────▶ Upgraded (bytes past the head are returned)
//! ```

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};

use crate::error::CodecError;

/// Default limit for a response head.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 16 * 1024;

const MAX_HEADERS: usize = 128;
const MAX_CHUNK_LINE: usize = 4 * 1024;
const READ_RESERVE: usize = 8 * 1024;

/// Status line and headers of one response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// False when the server asked to close the connection after this
    /// response, or when the body is delimited by connection close.
    pub keep_alive: bool,
    /// True for `101 Switching Protocols`.
    pub upgrade: bool,
}

impl ResponseHead {
    /// Returns true if a comma separated `connection` header lists `token`.
    pub fn connection_has(&self, token: &str) -> bool {
        header_has_token(&self.headers, http::header::CONNECTION, token)
    }
}

/// Output of [`ResponseParser::poll_event`].
#[derive(Debug)]
pub enum ParseEvent {
    /// A complete status line and header block.
    Head(ResponseHead),
    /// A slice of the response body, with framing removed.
    Body(Bytes),
    /// End of the message, carrying trailers (empty unless chunked).
    Complete(HeaderMap),
}

/// Caller's answer to a [`ParseEvent::Head`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadDecision {
    /// Read the body as framed by the headers.
    Body,
    /// The response has no body regardless of its headers (HEAD, 1xx).
    SkipBody,
    /// Stop parsing; the connection now speaks another protocol.
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Decide(BodyKind),
    Length(u64),
    Chunked(Chunk),
    Eof,
    Done,
    Upgraded,
}

/// Incremental response parser for one connection.
#[derive(Debug)]
pub struct ResponseParser {
    buf: BytesMut,
    state: State,
    max_header_size: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_SIZE)
    }
}

impl ResponseParser {
    pub fn new(max_header_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_RESERVE),
            state: State::Head,
            max_header_size,
        }
    }

    /// Buffer to read socket bytes into. Spare capacity is reserved first.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        self.buf.reserve(READ_RESERVE);
        &mut self.buf
    }

    /// Append bytes to the parse buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes buffered and not yet parsed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns true between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Head && self.buf.is_empty()
    }

    /// Returns true after a head was yielded and before `decide` is called.
    pub fn awaiting_decision(&self) -> bool {
        matches!(self.state, State::Decide(_))
    }

    /// Returns true once the connection was handed off.
    pub fn is_upgraded(&self) -> bool {
        self.state == State::Upgraded
    }

    /// Parse the next event from buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed or when the parser is
    /// waiting for [`decide`](Self::decide).
    pub fn poll_event(&mut self) -> Result<Option<ParseEvent>, CodecError> {
        loop {
            match self.state {
                State::Head => return self.parse_head(),
                State::Decide(_) | State::Upgraded => return Ok(None),
                State::Done => {
                    self.state = State::Head;
                    return Ok(Some(ParseEvent::Complete(HeaderMap::new())));
                }
                State::Length(0) => {
                    self.state = State::Head;
                    return Ok(Some(ParseEvent::Complete(HeaderMap::new())));
                }
                State::Length(remaining) => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(self.buf.len() as u64);
                    self.state = State::Length(remaining - n);
                    let data = self.buf.split_to(n as usize).freeze();
                    return Ok(Some(ParseEvent::Body(data)));
                }
                State::Eof => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(ParseEvent::Body(self.buf.split().freeze())));
                }
                State::Chunked(chunk) => match chunk {
                    Chunk::Size => {
                        if !self.parse_chunk_size()? {
                            return Ok(None);
                        }
                    }
                    Chunk::Data(remaining) => {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        let n = remaining.min(self.buf.len() as u64);
                        let next = if n == remaining {
                            Chunk::DataEnd
                        } else {
                            Chunk::Data(remaining - n)
                        };
                        self.state = State::Chunked(next);
                        let data = self.buf.split_to(n as usize).freeze();
                        return Ok(Some(ParseEvent::Body(data)));
                    }
                    Chunk::DataEnd => {
                        if self.buf.len() < 2 {
                            return Ok(None);
                        }
                        if &self.buf[..2] != b"\r\n" {
                            return Err(CodecError::InvalidChunk(
                                "missing CRLF after chunk data".into(),
                            ));
                        }
                        self.buf.advance(2);
                        self.state = State::Chunked(Chunk::Size);
                    }
                    Chunk::Trailers => return self.parse_trailers(),
                },
            }
        }
    }

    /// Tell the parser how to treat the body of the head just yielded.
    ///
    /// For [`HeadDecision::Upgrade`] the bytes already buffered past the
    /// header terminator are returned so they can be replayed to the new
    /// owner of the socket. Otherwise the returned buffer is empty.
    pub fn decide(&mut self, decision: HeadDecision) -> Bytes {
        let State::Decide(kind) = self.state else {
            return Bytes::new();
        };

        match decision {
            HeadDecision::Body => {
                self.state = match kind {
                    BodyKind::Empty => State::Done,
                    BodyKind::Length(len) => State::Length(len),
                    BodyKind::Chunked => State::Chunked(Chunk::Size),
                    BodyKind::Eof => State::Eof,
                };
                Bytes::new()
            }
            HeadDecision::SkipBody => {
                self.state = State::Done;
                Bytes::new()
            }
            HeadDecision::Upgrade => {
                self.state = State::Upgraded;
                self.buf.split().freeze()
            }
        }
    }

    /// Signal that the peer closed its write side.
    ///
    /// Completes a close-delimited body. Anything else in flight is an
    /// [`CodecError::IncompleteMessage`].
    pub fn finish_eof(&mut self) -> Result<Option<ParseEvent>, CodecError> {
        match self.state {
            State::Eof => {
                self.state = State::Head;
                Ok(Some(ParseEvent::Complete(HeaderMap::new())))
            }
            State::Head if self.buf.is_empty() => Ok(None),
            State::Upgraded => Ok(None),
            _ => Err(CodecError::IncompleteMessage),
        }
    }

    fn parse_head(&mut self) -> Result<Option<ParseEvent>, CodecError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let len = match response.parse(&self.buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => {
                if self.buf.len() > self.max_header_size {
                    return Err(CodecError::HeadersTooLarge {
                        limit: self.max_header_size,
                    });
                }
                return Ok(None);
            }
        };

        if len > self.max_header_size {
            return Err(CodecError::HeadersTooLarge {
                limit: self.max_header_size,
            });
        }

        let code = response
            .code
            .ok_or_else(|| CodecError::parse("missing status code"))?;
        let status = StatusCode::from_u16(code)
            .map_err(|_| CodecError::parse(format!("invalid status code {code}")))?;
        let version = match response.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };
        let map = to_header_map(response.headers)?;
        self.buf.advance(len);

        let kind = body_kind(status, &map)?;
        let keep_alive = kind != BodyKind::Eof
            && if version == Version::HTTP_10 {
                header_has_token(&map, http::header::CONNECTION, "keep-alive")
            } else {
                !header_has_token(&map, http::header::CONNECTION, "close")
            };

        self.state = State::Decide(kind);
        Ok(Some(ParseEvent::Head(ResponseHead {
            status,
            version,
            headers: map,
            keep_alive,
            upgrade: status == StatusCode::SWITCHING_PROTOCOLS,
        })))
    }

    fn parse_chunk_size(&mut self) -> Result<bool, CodecError> {
        match httparse::parse_chunk_size(&self.buf) {
            Ok(httparse::Status::Complete((consumed, size))) => {
                self.buf.advance(consumed);
                self.state = State::Chunked(if size == 0 {
                    Chunk::Trailers
                } else {
                    Chunk::Data(size)
                });
                Ok(true)
            }
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > MAX_CHUNK_LINE {
                    return Err(CodecError::InvalidChunk("chunk size line too long".into()));
                }
                Ok(false)
            }
            Err(_) => Err(CodecError::InvalidChunk("invalid chunk size".into())),
        }
    }

    fn parse_trailers(&mut self) -> Result<Option<ParseEvent>, CodecError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        match httparse::parse_headers(&self.buf, &mut headers)? {
            httparse::Status::Complete((len, parsed)) => {
                let trailers = to_header_map(parsed)?;
                self.buf.advance(len);
                self.state = State::Head;
                Ok(Some(ParseEvent::Complete(trailers)))
            }
            httparse::Status::Partial => {
                if self.buf.len() > self.max_header_size {
                    return Err(CodecError::HeadersTooLarge {
                        limit: self.max_header_size,
                    });
                }
                Ok(None)
            }
        }
    }
}

fn to_header_map(headers: &[httparse::Header<'_>]) -> Result<HeaderMap, CodecError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| CodecError::InvalidHeader(header.name.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| CodecError::InvalidHeader(header.name.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

fn body_kind(status: StatusCode, headers: &HeaderMap) -> Result<BodyKind, CodecError> {
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyKind::Empty);
    }

    let mut encodings = headers.get_all(http::header::TRANSFER_ENCODING).iter().peekable();
    if encodings.peek().is_some() {
        let last = encodings
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .last();
        return Ok(match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => BodyKind::Chunked,
            _ => BodyKind::Eof,
        });
    }

    let mut length = None;
    for value in headers.get_all(http::header::CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| CodecError::InvalidHeader("content-length".into()))?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(CodecError::InvalidHeader(
                    "conflicting content-length values".into(),
                ));
            }
            _ => length = Some(parsed),
        }
    }

    Ok(match length {
        Some(len) => BodyKind::Length(len),
        None => BodyKind::Eof,
    })
}

/// Returns true if a comma separated header lists `token` (ASCII case-insensitive).
pub fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
