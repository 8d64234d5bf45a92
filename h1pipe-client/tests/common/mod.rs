//! Scripted HTTP/1.1 peers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use h1pipe_client::ClientError;
use h1pipe_client::transport::{BoxIo, Connect, ConnectTarget};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A request as the server saw it.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub chunked: bool,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Server side of one client connection.
pub struct Peer<S> {
    io: S,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Peer<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            buf: BytesMut::new(),
        }
    }

    /// Next request, or `None` once the client closed the connection.
    pub async fn read_request(&mut self) -> Option<Request> {
        let (method, path, headers) = loop {
            if let Some((method, path, headers, len)) = parse_head(&self.buf) {
                self.buf.advance(len);
                break (method, path, headers);
            }
            if !self.fill().await {
                return None;
            }
        };

        let mut request = Request {
            method,
            path,
            headers,
            body: Vec::new(),
            chunked: false,
        };

        if request
            .header("transfer-encoding")
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
        {
            request.chunked = true;
            loop {
                let line = self.read_line().await?;
                let size_text = line.split(';').next().unwrap_or_default().trim();
                let size = usize::from_str_radix(size_text, 16).expect("chunk size");
                if size == 0 {
                    while !self.read_line().await?.is_empty() {}
                    break;
                }
                request.body.extend_from_slice(&self.read_exact(size).await?);
                assert!(self.read_line().await?.is_empty(), "chunk terminator");
            }
        } else if let Some(length) = request.header("content-length") {
            let length: usize = length.parse().expect("content-length");
            request.body = self.read_exact(length).await?;
        }

        Some(request)
    }

    pub async fn read_exact(&mut self, n: usize) -> Option<Vec<u8>> {
        while self.buf.len() < n {
            if !self.fill().await {
                return None;
            }
        }
        Some(self.buf.split_to(n).to_vec())
    }

    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos);
                self.buf.advance(2);
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    async fn fill(&mut self) -> bool {
        matches!(self.io.read_buf(&mut self.buf).await, Ok(n) if n > 0)
    }

    pub async fn write(&mut self, data: impl AsRef<[u8]>) {
        self.io.write_all(data.as_ref()).await.expect("write to client");
        self.io.flush().await.expect("flush to client");
    }

    /// Wait until the client closes the connection. Returns false if it
    /// sent more data instead.
    pub async fn closed(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        !self.fill().await
    }
}

fn parse_head(buf: &[u8]) -> Option<(String, String, Vec<(String, String)>, usize)> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buf).expect("valid request head") {
        httparse::Status::Complete(len) => {
            let headers = request
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_ascii_lowercase(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            Some((
                request.method?.to_string(),
                request.path?.to_string(),
                headers,
                len,
            ))
        }
        httparse::Status::Partial => None,
    }
}

pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

pub async fn accept(listener: &TcpListener) -> Peer<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    Peer::new(stream)
}

/// Connector that opens an in-memory pipe per connection attempt and hands
/// the server side to the test.
pub fn pipe_connector() -> (impl Connect, mpsc::UnboundedReceiver<Peer<DuplexStream>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = move |_target: ConnectTarget| {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let accepted = tx.send(Peer::new(server)).is_ok();
        async move {
            if accepted {
                Ok(Box::new(client) as BoxIo)
            } else {
                Err(ClientError::socket("test server gone"))
            }
        }
    };
    (connector, rx)
}

/// Servernames passed to a connector, one entry per connection attempt.
pub type Servernames = Arc<Mutex<Vec<Option<String>>>>;

/// Like [`pipe_connector`], but records the servername of every attempt and
/// fails attempts for `reject` with a certificate name mismatch.
pub fn recording_connector(
    reject: Option<&'static str>,
) -> (
    impl Connect,
    Servernames,
    mpsc::UnboundedReceiver<Peer<DuplexStream>>,
) {
    let seen = Servernames::default();
    let (tx, rx) = mpsc::unbounded_channel();
    let log = Arc::clone(&seen);
    let connector = move |target: ConnectTarget| {
        log.lock().unwrap().push(target.servername.clone());
        let result = if reject.is_some() && target.servername.as_deref() == reject {
            Err(ClientError::CertificateNameMismatch(
                target.servername.unwrap_or_default(),
            ))
        } else {
            let (client, server) = tokio::io::duplex(64 * 1024);
            match tx.send(Peer::new(server)) {
                Ok(()) => Ok(Box::new(client) as BoxIo),
                Err(_) => Err(ClientError::socket("test server gone")),
            }
        };
        async move { result }
    };
    (connector, seen, rx)
}

pub fn ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    )
}
