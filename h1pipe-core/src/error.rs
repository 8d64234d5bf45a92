//! Error type for the HTTP/1.1 codec.

/// Errors produced while encoding a request or parsing a response.
///
/// Every variant describes a framing fault on a single message. The caller
/// decides whether the fault is local to one request (an encode error found
/// before any byte was written) or poisons the connection (anything found
/// while bytes are already on the wire).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The body length disagrees with the declared `content-length`.
    #[error("request body length {actual} does not match content-length {expected}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    /// The response head did not fit in the configured limit.
    #[error("response headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },

    /// The status line or header block is malformed.
    #[error("invalid response: {0}")]
    Parse(String),

    /// A chunk size line or chunk terminator is malformed.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// A framing header carries an unusable value.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The peer closed the stream in the middle of a message.
    #[error("connection closed before message completed")]
    IncompleteMessage,
}

impl CodecError {
    /// Create a parse error from any displayable value.
    pub fn parse(message: impl Into<String>) -> Self {
        CodecError::Parse(message.into())
    }

    /// Returns true if this error was raised on the request side.
    pub fn is_encode_error(&self) -> bool {
        matches!(self, CodecError::ContentLengthMismatch { .. })
    }
}

impl From<httparse::Error> for CodecError {
    fn from(err: httparse::Error) -> Self {
        CodecError::Parse(err.to_string())
    }
}
