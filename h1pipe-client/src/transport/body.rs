//! Request body types.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::ClientError;

/// Boxed source of request body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// A request body.
///
/// - [`RequestBody::Empty`]: no body
/// - [`RequestBody::Full`]: a buffered body, written with `content-length`
/// - [`RequestBody::Streaming`]: chunks produced over time, written with
///   `content-length` when declared and chunked transfer coding otherwise
///
/// Streaming bodies cannot be replayed, so a request carrying one is never
/// pipelined behind another request.
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Full(Bytes),
    Streaming(BodyStream),
}

impl RequestBody {
    pub fn empty() -> Self {
        RequestBody::Empty
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        RequestBody::Full(data.into())
    }

    /// Create a streaming body from the given stream.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        RequestBody::Streaming(Box::pin(stream))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Streaming(_))
    }

    /// Exact length in bytes, if known without polling.
    pub fn exact_len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Full(data) => Some(data.len() as u64),
            RequestBody::Streaming(_) => None,
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(data: Bytes) -> Self {
        RequestBody::Full(data)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        RequestBody::Full(data.into())
    }
}

impl From<String> for RequestBody {
    fn from(data: String) -> Self {
        RequestBody::Full(data.into())
    }
}

impl From<&'static str> for RequestBody {
    fn from(data: &'static str) -> Self {
        RequestBody::Full(Bytes::from_static(data.as_bytes()))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(data: &'static [u8]) -> Self {
        RequestBody::Full(Bytes::from_static(data))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "RequestBody::Empty"),
            RequestBody::Full(data) => f
                .debug_struct("RequestBody::Full")
                .field("data_len", &data.len())
                .finish(),
            RequestBody::Streaming(_) => write!(f, "RequestBody::Streaming"),
        }
    }
}
