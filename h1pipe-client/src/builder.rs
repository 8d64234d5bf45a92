//! Builder for [`Client`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Uri;

use crate::ClientError;
use crate::client::Client;
use crate::config::ReconnectPolicy;
use crate::dispatcher::Settings;
use crate::transport::{Connect, ConnectTarget, Scheme, TransportConnector};

/// Default client settings.
pub mod defaults {
    use std::time::Duration;

    pub const PIPELINING: usize = 1;
    pub const MAX_HEADER_SIZE: usize = h1pipe_core::DEFAULT_MAX_HEADER_SIZE;
    pub const HEADERS_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
    /// Keep-alive timeout when the server does not advertise one.
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(4);
    pub const MAX_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(600);
    /// Subtracted from a server-advertised keep-alive timeout.
    pub const KEEP_ALIVE_TIMEOUT_THRESHOLD: Duration = Duration::from_secs(1);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Response bytes read and dropped for an abandoned request before the
    /// connection is recycled instead.
    pub const MAX_ABORTED_PAYLOAD: u64 = 1024 * 1024;
}

/// Builder for creating a [`Client`] bound to one origin.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
///
/// let client = Client::builder("http://localhost:3000")
///     .pipelining(10)
///     .headers_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
///
/// Durations set to zero disable the corresponding timer.
pub struct ClientBuilder {
    url: String,
    socket_path: Option<PathBuf>,
    servername: Option<String>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    connector: Option<Arc<dyn Connect>>,
    pipelining: usize,
    max_header_size: usize,
    headers_timeout: Duration,
    socket_timeout: Duration,
    idle_timeout: Duration,
    max_keep_alive_timeout: Duration,
    keep_alive_timeout_threshold: Duration,
    request_timeout: Duration,
    max_aborted_payload: u64,
    reconnect: ReconnectPolicy,
}

impl ClientBuilder {
    /// Create a builder for an origin such as `http://localhost:3000`.
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            socket_path: None,
            servername: None,
            tls_config: None,
            connector: None,
            pipelining: defaults::PIPELINING,
            max_header_size: defaults::MAX_HEADER_SIZE,
            headers_timeout: defaults::HEADERS_TIMEOUT,
            socket_timeout: defaults::SOCKET_TIMEOUT,
            idle_timeout: defaults::IDLE_TIMEOUT,
            max_keep_alive_timeout: defaults::MAX_KEEP_ALIVE_TIMEOUT,
            keep_alive_timeout_threshold: defaults::KEEP_ALIVE_TIMEOUT_THRESHOLD,
            request_timeout: defaults::REQUEST_TIMEOUT,
            max_aborted_payload: defaults::MAX_ABORTED_PAYLOAD,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Connect over a Unix domain socket. The URL still supplies the `host`
    /// header.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Default TLS server name. Requests may override it.
    pub fn servername(mut self, servername: impl Into<String>) -> Self {
        self.servername = Some(servername.into());
        self
    }

    /// TLS configuration for `https` origins. Without one the feature-gated
    /// default is used.
    pub fn tls_config(mut self, config: rustls::ClientConfig) -> Self {
        self.tls_config = Some(Arc::new(config));
        self
    }

    /// Replace the socket layer entirely.
    pub fn connector<C: Connect>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Maximum requests written before their responses arrive. Must be >= 1.
    pub fn pipelining(mut self, depth: usize) -> Self {
        self.pipelining = depth;
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = timeout;
        self
    }

    /// Inactivity timeout while requests are in flight. Also bounds
    /// connection attempts and the reconnect backoff.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.max_keep_alive_timeout = timeout;
        self
    }

    pub fn keep_alive_timeout_threshold(mut self, threshold: Duration) -> Self {
        self.keep_alive_timeout_threshold = threshold;
        self
    }

    /// Default per-request deadline for receiving response headers.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_aborted_payload(mut self, bytes: u64) -> Self {
        self.max_aborted_payload = bytes;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Validate the configuration and start the connection task.
    ///
    /// Must be called inside a tokio runtime. No connection is opened until
    /// the first request is dispatched.
    pub fn build(self) -> Result<Client, ClientError> {
        let (settings, host_header, request_timeout) = self.into_settings()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::invalid_argument("client must be built inside a tokio runtime")
        })?;
        Ok(Client::start(settings, host_header, request_timeout, &runtime))
    }

    fn into_settings(self) -> Result<(Settings, String, Duration), ClientError> {
        let origin = Origin::parse(&self.url)?;

        if self.pipelining == 0 {
            return Err(ClientError::invalid_argument("invalid pipelining"));
        }
        if self.max_header_size == 0 {
            return Err(ClientError::invalid_argument("invalid max header size"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ClientError::invalid_argument("invalid idle timeout"));
        }
        if self.max_keep_alive_timeout.is_zero() {
            return Err(ClientError::invalid_argument("invalid max keep-alive timeout"));
        }
        if let Some(servername) = &self.servername {
            if servername.is_empty() {
                return Err(ClientError::invalid_argument("invalid servername"));
            }
        }
        self.reconnect
            .validate()
            .map_err(|message| ClientError::invalid_argument(format!("invalid reconnect policy: {message}")))?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let tls = match origin.scheme {
                    Scheme::Http => None,
                    Scheme::Https => Some(match self.tls_config {
                        Some(config) => config,
                        None => Arc::new(default_tls()?),
                    }),
                };
                Arc::new(TransportConnector::new(tls))
            }
        };

        let host_header = origin.host_header();
        let settings = Settings {
            target: ConnectTarget {
                scheme: origin.scheme,
                host: origin.host,
                port: origin.port,
                socket_path: self.socket_path,
                servername: self.servername,
            },
            connector,
            pipelining: self.pipelining,
            max_header_size: self.max_header_size,
            headers_timeout: self.headers_timeout,
            socket_timeout: self.socket_timeout,
            idle_timeout: self.idle_timeout,
            max_keep_alive_timeout: self.max_keep_alive_timeout,
            keep_alive_timeout_threshold: self.keep_alive_timeout_threshold,
            max_aborted_payload: self.max_aborted_payload,
            reconnect: self.reconnect,
        };
        Ok((settings, host_header, self.request_timeout))
    }
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn default_tls() -> Result<rustls::ClientConfig, ClientError> {
    crate::transport::default_tls_config().ok_or_else(|| {
        ClientError::invalid_argument(
            "https requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, or install a default provider",
        )
    })
}

#[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
fn default_tls() -> Result<rustls::ClientConfig, ClientError> {
    Err(ClientError::invalid_argument(
        "https requires root certificates: enable `tls-native-roots` or `tls-webpki-roots`, or set tls_config",
    ))
}

/// Scheme, host and port of the configured URL.
#[derive(Debug, PartialEq, Eq)]
struct Origin {
    scheme: Scheme,
    /// Without IPv6 brackets.
    host: String,
    port: u16,
    explicit_port: bool,
    ipv6: bool,
}

impl Origin {
    fn parse(url: &str) -> Result<Self, ClientError> {
        if url.contains('#') {
            return Err(ClientError::invalid_argument("invalid url: fragment not allowed"));
        }
        let uri: Uri = url
            .parse()
            .map_err(|_| ClientError::invalid_argument(format!("invalid url: {url}")))?;

        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            _ => return Err(ClientError::invalid_argument("invalid url: protocol must be http or https")),
        };

        if let Some(path_and_query) = uri.path_and_query() {
            if path_and_query.query().is_some() {
                return Err(ClientError::invalid_argument("invalid url: query not allowed"));
            }
            if !matches!(path_and_query.path(), "" | "/") {
                return Err(ClientError::invalid_argument("invalid url: path must be /"));
            }
        }

        let authority = uri
            .authority()
            .ok_or_else(|| ClientError::invalid_argument("invalid url: missing host"))?;
        let raw_host = authority.host();
        if raw_host.is_empty() {
            return Err(ClientError::invalid_argument("invalid url: missing host"));
        }
        let ipv6 = raw_host.starts_with('[');
        let host = raw_host.trim_start_matches('[').trim_end_matches(']').to_owned();

        let explicit_port = authority.port_u16();
        let host_and_port = authority.as_str().rsplit('@').next().unwrap_or_default();
        let port_text = host_and_port.rsplit_once(']').map_or(host_and_port, |(_, rest)| rest);
        if explicit_port.is_none() && port_text.contains(':') {
            return Err(ClientError::invalid_argument("invalid url: invalid port"));
        }

        Ok(Self {
            scheme,
            host,
            port: explicit_port.unwrap_or(scheme.default_port()),
            explicit_port: explicit_port.is_some(),
            ipv6,
        })
    }

    /// Value sent as `host` when a request does not set one.
    fn host_header(&self) -> String {
        let host = if self.ipv6 {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.explicit_port {
            format!("{host}:{}", self.port)
        } else {
            host
        }
    }
}
