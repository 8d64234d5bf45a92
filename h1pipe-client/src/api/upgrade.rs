use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::oneshot;

use crate::ClientError;
use crate::client::Client;
use crate::config::{Opaque, RequestOptions};
use crate::handler::{Flow, Handler, Resumer};
use crate::transport::Upgraded;
use super::AbortOnDrop;

/// Protocol requested by [`Client::upgrade`] when none is set.
pub const DEFAULT_UPGRADE_PROTOCOL: &str = "Websocket";

/// Socket handed over after `101 Switching Protocols`.
pub struct UpgradeData {
    pub headers: HeaderMap,
    pub socket: Upgraded,
    pub opaque: Option<Opaque>,
}

/// Tunnel established by `CONNECT`.
pub struct ConnectData {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub socket: Upgraded,
    pub opaque: Option<Opaque>,
}

impl fmt::Debug for UpgradeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeData")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ConnectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectData")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

type Switched = (StatusCode, HeaderMap, Upgraded);

struct UpgradeHandler {
    tx: Option<oneshot::Sender<Result<Switched, ClientError>>>,
}

impl Handler for UpgradeHandler {
    fn on_headers(&mut self, _status: StatusCode, _headers: &HeaderMap, _resume: Resumer) -> Flow {
        Flow::Continue
    }

    fn on_body(&mut self, _chunk: Bytes) -> Flow {
        Flow::Discard
    }

    fn on_complete(&mut self, _trailers: HeaderMap) {
        self.on_error(ClientError::protocol("expected an upgrade"));
    }

    fn on_upgrade(&mut self, status: StatusCode, headers: HeaderMap, socket: Upgraded) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok((status, headers, socket)));
        }
    }

    fn on_error(&mut self, error: ClientError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl Client {
    /// Request a protocol switch and take over the socket.
    ///
    /// The protocol defaults to [`DEFAULT_UPGRADE_PROTOCOL`]. The request is
    /// never pipelined: it waits until nothing else is on the wire, and the
    /// client opens a new connection for whatever is queued behind it.
    pub async fn upgrade(&self, mut options: RequestOptions) -> Result<UpgradeData, ClientError> {
        if options.method == Method::CONNECT {
            return Err(ClientError::invalid_argument("use connect for CONNECT"));
        }
        if options.upgrade.is_none() {
            options = options.upgrade(DEFAULT_UPGRADE_PROTOCOL);
        }
        let opaque = options.take_opaque();
        let (_, headers, socket) = self.switch(options).await?;
        Ok(UpgradeData {
            headers,
            socket,
            opaque,
        })
    }

    /// Open a tunnel with `CONNECT`. The path names the authority, as in
    /// [`RequestOptions::connect`].
    pub async fn connect(&self, mut options: RequestOptions) -> Result<ConnectData, ClientError> {
        if options.upgrade.is_some() {
            return Err(ClientError::invalid_argument("invalid upgrade"));
        }
        options.method = Method::CONNECT;
        let opaque = options.take_opaque();
        let (status, headers, socket) = self.switch(options).await?;
        Ok(ConnectData {
            status,
            headers,
            socket,
            opaque,
        })
    }

    async fn switch(&self, options: RequestOptions) -> Result<Switched, ClientError> {
        let (tx, rx) = oneshot::channel();
        let handle = self.dispatch(options, UpgradeHandler { tx: Some(tx) })?;
        let mut guard = AbortOnDrop::new(handle);
        let result = rx.await.unwrap_or(Err(ClientError::ClientDestroyed));
        guard.disarm();
        result
    }
}
