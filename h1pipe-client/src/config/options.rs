//! Per-request options.
//!
//! [`RequestOptions`] describes one exchange: method, target, headers, body
//! and the flags the pipeline queue uses for admission (idempotency,
//! upgrade, servername).

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method};

use crate::ClientError;
use crate::transport::RequestBody;

/// Caller token passed back untouched with the response.
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// Options for one request.
///
/// # Example
///
/// ```
/// use h1pipe_client::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::post("/users")
///     .header("content-type", "application/json")
///     .body(r#"{"name":"ada"}"#)
///     .request_timeout(Duration::from_secs(5));
/// assert_eq!(options.path(), "/users");
/// ```
pub struct RequestOptions {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) idempotent: Option<bool>,
    pub(crate) upgrade: Option<String>,
    pub(crate) servername: Option<String>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) opaque: Option<Opaque>,
    invalid_header: Option<String>,
}

impl RequestOptions {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            idempotent: None,
            upgrade: None,
            servername: None,
            request_timeout: None,
            opaque: None,
            invalid_header: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// A CONNECT request for `authority` (`host:port`).
    pub fn connect(authority: impl Into<String>) -> Self {
        Self::new(Method::CONNECT, authority)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append a header.
    ///
    /// An invalid name or value is reported as
    /// [`ClientError::InvalidArgument`] when the request is dispatched.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                self.invalid_header.get_or_insert_with(|| "invalid header".to_string());
            }
        }
        self
    }

    /// Try to append a header, returning `None` if the name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.append(name, value);
        Some(self)
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Declare whether the request is safe to replay after a connection
    /// failure. Defaults to true for GET and HEAD.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Request a protocol upgrade (`connection: upgrade`, `upgrade: <protocol>`).
    pub fn upgrade(mut self, protocol: impl Into<String>) -> Self {
        self.upgrade = Some(protocol.into());
        self
    }

    /// TLS servername for this request. Requests with different servernames
    /// never share a connection.
    pub fn servername(mut self, servername: impl Into<String>) -> Self {
        self.servername = Some(servername.into());
        self
    }

    /// Override the client's request timeout. Zero disables it.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Attach a token returned with the response.
    pub fn opaque<T: Any + Send + Sync>(mut self, opaque: T) -> Self {
        self.opaque = Some(Arc::new(opaque));
        self
    }

    /// Remove the caller token. The response wrappers hand it back with the
    /// response; [`Client::dispatch`](crate::Client::dispatch) ignores it.
    pub(crate) fn take_opaque(&mut self) -> Option<Opaque> {
        self.opaque.take()
    }

    /// Check the options and split out the headers the client owns.
    pub(crate) fn into_parts(self) -> Result<RequestParts, ClientError> {
        if let Some(message) = self.invalid_header {
            return Err(ClientError::InvalidArgument(message));
        }

        validate_path(&self.method, &self.path)?;

        if let Some(protocol) = &self.upgrade {
            if protocol.is_empty() || HeaderValue::from_str(protocol).is_err() {
                return Err(ClientError::invalid_argument("invalid upgrade protocol"));
            }
        }

        if let Some(servername) = &self.servername {
            if servername.is_empty() {
                return Err(ClientError::invalid_argument("invalid servername"));
            }
        }

        let mut headers = self.headers;
        for name in [
            header::TRANSFER_ENCODING,
            header::CONNECTION,
            HeaderName::from_static("keep-alive"),
            header::UPGRADE,
        ] {
            if headers.contains_key(&name) {
                return Err(ClientError::InvalidArgument(format!("invalid {name} header")));
            }
        }
        if headers.contains_key(header::EXPECT) {
            return Err(ClientError::invalid_argument("expect header not supported"));
        }

        let host = match headers.remove(header::HOST) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ClientError::invalid_argument("invalid host header"))?
                    .to_string(),
            ),
            None => None,
        };

        let content_length = match headers.remove(header::CONTENT_LENGTH) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| ClientError::invalid_argument("invalid content-length header"))?,
            ),
            None => None,
        };

        let idempotent = self
            .idempotent
            .unwrap_or_else(|| h1pipe_core::is_idempotent_by_default(&self.method));

        Ok(RequestParts {
            method: self.method,
            path: self.path,
            host,
            headers,
            body: self.body,
            content_length,
            idempotent,
            upgrade: self.upgrade,
            servername: self.servername,
            request_timeout: self.request_timeout,
        })
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("idempotent", &self.idempotent)
            .field("upgrade", &self.upgrade)
            .field("servername", &self.servername)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn validate_path(method: &Method, path: &str) -> Result<(), ClientError> {
    let well_formed = if method == Method::CONNECT {
        !path.is_empty() && !path.starts_with('/')
    } else {
        path.starts_with('/') || (method == Method::OPTIONS && path == "*")
    };
    if !well_formed || path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ClientError::invalid_argument("invalid request path"));
    }
    Ok(())
}

/// Validated request with client-owned headers split out.
pub(crate) struct RequestParts {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) host: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) content_length: Option<u64>,
    pub(crate) idempotent: bool,
    pub(crate) upgrade: Option<String>,
    pub(crate) servername: Option<String>,
    pub(crate) request_timeout: Option<Duration>,
}
