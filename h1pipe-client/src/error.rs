//! Error types for the pipelined client.

use std::io;

use h1pipe_core::CodecError;

/// Coarse classification of a [`ClientError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Socket,
    SocketTimeout,
    HeadersTimeout,
    RequestTimeout,
    ContentLengthMismatch,
    ClientClosed,
    ClientDestroyed,
    RequestAborted,
    Informational,
    Protocol,
    Parse,
    CertificateNameMismatch,
    Body,
}

/// Errors delivered to request handlers and returned by client operations.
///
/// The type is `Clone` because a single connection failure fans out to every
/// in-flight request it affects.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// Bad configuration or request options. Raised synchronously.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failure. `kind` is set when the error came from the OS.
    #[error("socket error: {message}")]
    Socket {
        kind: Option<io::ErrorKind>,
        message: String,
    },

    /// The socket was idle for longer than allowed.
    #[error("socket timeout")]
    SocketTimeout,

    /// Response headers did not arrive in time.
    #[error("headers timeout")]
    HeadersTimeout,

    /// The request did not receive its response headers before its deadline.
    #[error("request timeout")]
    RequestTimeout,

    /// The request body length disagrees with its declared content-length.
    #[error("request body length {actual} does not match content-length {expected}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    /// The client no longer accepts requests because `close` was called.
    #[error("the client is closed")]
    ClientClosed,

    /// The client was destroyed.
    #[error("the client is destroyed")]
    ClientDestroyed,

    /// The request was aborted by the caller.
    #[error("request aborted")]
    RequestAborted,

    /// Internal signal that forces a reconnect, such as "request reset".
    #[error("{0}")]
    Informational(String),

    /// The server broke an HTTP/1.1 rule the client relies on.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response could not be parsed.
    #[error("parse error: {0}")]
    Parse(CodecError),

    /// The server certificate does not cover the requested servername.
    #[error("certificate name mismatch: {0}")]
    CertificateNameMismatch(String),

    /// A streaming request body or a response sink failed.
    #[error("body error: {0}")]
    Body(String),
}

impl ClientError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        ClientError::InvalidArgument(message.into())
    }

    /// A socket error that did not come from the OS.
    pub fn socket<S: Into<String>>(message: S) -> Self {
        ClientError::Socket {
            kind: None,
            message: message.into(),
        }
    }

    pub fn informational<S: Into<String>>(message: S) -> Self {
        ClientError::Informational(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        ClientError::Protocol(message.into())
    }

    pub fn body<S: Into<String>>(message: S) -> Self {
        ClientError::Body(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ClientError::Socket { .. } => ErrorKind::Socket,
            ClientError::SocketTimeout => ErrorKind::SocketTimeout,
            ClientError::HeadersTimeout => ErrorKind::HeadersTimeout,
            ClientError::RequestTimeout => ErrorKind::RequestTimeout,
            ClientError::ContentLengthMismatch { .. } => ErrorKind::ContentLengthMismatch,
            ClientError::ClientClosed => ErrorKind::ClientClosed,
            ClientError::ClientDestroyed => ErrorKind::ClientDestroyed,
            ClientError::RequestAborted => ErrorKind::RequestAborted,
            ClientError::Informational(_) => ErrorKind::Informational,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Parse(_) => ErrorKind::Parse,
            ClientError::CertificateNameMismatch(_) => ErrorKind::CertificateNameMismatch,
            ClientError::Body(_) => ErrorKind::Body,
        }
    }

    /// Returns whether this is a routine network condition.
    ///
    /// Transient errors raised while nothing is running are left to the
    /// close handler, which reconnects with backoff. Any other error raised
    /// in that state fails every queued request.
    ///
    /// ```
    /// use h1pipe_client::ClientError;
    /// use std::io;
    ///
    /// let refused: ClientError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
    /// assert!(refused.is_transient());
    ///
    /// let dns: ClientError = io::Error::new(io::ErrorKind::NotFound, "no such host").into();
    /// assert!(!dns.is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Socket { kind: None, .. } => true,
            ClientError::Socket {
                kind: Some(kind), ..
            } => matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            ),
            ClientError::Protocol(_) | ClientError::Informational(_) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            return ClientError::SocketTimeout;
        }
        ClientError::Socket {
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ContentLengthMismatch { expected, actual } => {
                ClientError::ContentLengthMismatch { expected, actual }
            }
            other => ClientError::Parse(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(ClientError::RequestAborted.kind(), ErrorKind::RequestAborted);
        assert_eq!(
            ClientError::invalid_argument("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(ClientError::socket("closed").kind(), ErrorKind::Socket);
    }

    #[test]
    fn test_is_transient() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::HostUnreachable,
            io::ErrorKind::NetworkUnreachable,
        ] {
            assert!(ClientError::from(io::Error::from(kind)).is_transient());
        }

        assert!(ClientError::socket("other side closed").is_transient());
        assert!(ClientError::informational("request reset").is_transient());
        assert!(ClientError::protocol("bad upgrade").is_transient());

        assert!(!ClientError::from(io::Error::from(io::ErrorKind::PermissionDenied)).is_transient());
        assert!(!ClientError::SocketTimeout.is_transient());
        assert!(!ClientError::CertificateNameMismatch("example.com".into()).is_transient());
        assert!(!ClientError::Parse(CodecError::IncompleteMessage).is_transient());
    }

    #[test]
    fn test_from_io_timeout() {
        let err = ClientError::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, ClientError::SocketTimeout));
    }

    #[test]
    fn test_from_codec_error() {
        let err = ClientError::from(CodecError::ContentLengthMismatch {
            expected: 3,
            actual: 1,
        });
        assert!(matches!(
            err,
            ClientError::ContentLengthMismatch {
                expected: 3,
                actual: 1
            }
        ));

        let err = ClientError::from(CodecError::IncompleteMessage);
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_display() {
        assert_eq!(ClientError::RequestAborted.to_string(), "request aborted");
        assert_eq!(
            ClientError::informational("request reset").to_string(),
            "request reset"
        );
    }
}
