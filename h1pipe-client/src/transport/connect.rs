//! Socket establishment.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::ClientError;

/// A bidirectional byte stream the client can drive.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxIo = Box<dyn Io>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Where and how to open a socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// Connect over this Unix domain socket instead of TCP.
    pub socket_path: Option<PathBuf>,
    /// TLS server name. Falls back to `host`.
    pub servername: Option<String>,
}

/// Opens sockets for the connection manager.
///
/// Implemented for [`TransportConnector`] and for closures, which makes it
/// easy to hand the client an in-memory stream in tests:
///
/// ```ignore
/// let client = Client::builder("http://localhost")
///     .connector(move |_target: ConnectTarget| {
///         let io = io.clone();
///         async move { Ok(Box::new(io.take()) as BoxIo) }
///     })
///     .build()?;
/// ```
pub trait Connect: Send + Sync + 'static {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, Result<BoxIo, ClientError>>;
}

impl<F, Fut> Connect for F
where
    F: Fn(ConnectTarget) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxIo, ClientError>> + Send + 'static,
{
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, Result<BoxIo, ClientError>> {
        Box::pin(self(target))
    }
}

/// TCP or Unix socket, with rustls layered on for `https`.
#[derive(Clone, Default)]
pub struct TransportConnector {
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl TransportConnector {
    pub fn new(tls: Option<Arc<rustls::ClientConfig>>) -> Self {
        Self { tls }
    }
}

impl fmt::Debug for TransportConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnector")
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Connect for TransportConnector {
    fn connect(&self, target: ConnectTarget) -> BoxFuture<'static, Result<BoxIo, ClientError>> {
        Box::pin(establish(self.tls.clone(), target))
    }
}

async fn establish(
    tls: Option<Arc<rustls::ClientConfig>>,
    target: ConnectTarget,
) -> Result<BoxIo, ClientError> {
    let io = open_socket(&target).await?;
    if target.scheme == Scheme::Http {
        return Ok(io);
    }

    let config = tls.ok_or_else(|| {
        ClientError::invalid_argument("https origin without a tls configuration")
    })?;
    let servername = target.servername.unwrap_or(target.host);
    let name = ServerName::try_from(servername.clone())
        .map_err(|_| ClientError::invalid_argument(format!("invalid servername {servername:?}")))?;

    let stream = TlsConnector::from(config)
        .connect(name, io)
        .await
        .map_err(|err| tls_error(err, &servername))?;
    tracing::trace!(%servername, "tls handshake complete");
    Ok(Box::new(stream))
}

async fn open_socket(target: &ConnectTarget) -> Result<BoxIo, ClientError> {
    match &target.socket_path {
        #[cfg(unix)]
        Some(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Some(_) => Err(ClientError::invalid_argument(
            "unix domain sockets are not supported on this platform",
        )),
        None => {
            let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}

/// A handshake that fails because the certificate does not cover the name
/// becomes [`ClientError::CertificateNameMismatch`].
fn tls_error(err: io::Error, servername: &str) -> ClientError {
    let name_mismatch = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|inner| match inner {
            rustls::Error::InvalidCertificate(cert) => {
                format!("{cert:?}").starts_with("NotValidForName")
            }
            _ => false,
        });

    if name_mismatch {
        ClientError::CertificateNameMismatch(servername.to_owned())
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(Scheme::Http.default_port(), 80);
        assert_eq!(Scheme::Https.default_port(), 443);
    }

    #[test]
    fn test_tls_name_mismatch() {
        let inner = rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName);
        let err = io::Error::new(io::ErrorKind::InvalidData, inner);
        assert!(matches!(
            tls_error(err, "example.com"),
            ClientError::CertificateNameMismatch(name) if name == "example.com"
        ));
    }

    #[test]
    fn test_tls_other_error() {
        let inner = rustls::Error::InvalidCertificate(rustls::CertificateError::Expired);
        let err = io::Error::new(io::ErrorKind::InvalidData, inner);
        assert!(matches!(
            tls_error(err, "example.com"),
            ClientError::Socket { kind: Some(io::ErrorKind::InvalidData), .. }
        ));
    }

    #[tokio::test]
    async fn test_http_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ConnectTarget {
            scheme: Scheme::Http,
            host: "127.0.0.1".into(),
            port,
            socket_path: None,
            servername: None,
        };
        let err = TransportConnector::default()
            .connect(target)
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_https_without_tls_config() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = ConnectTarget {
            scheme: Scheme::Https,
            host: "127.0.0.1".into(),
            port,
            socket_path: None,
            servername: None,
        };
        let err = TransportConnector::default()
            .connect(target)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }
}
