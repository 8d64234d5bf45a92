use std::fmt;
use std::mem;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::time::Instant;

use crate::ClientError;
use crate::config::RequestParts;
use crate::handler::{Flow, Handler, Resumer};
use crate::transport::{BodyStream, RequestBody, Upgraded};

pub(crate) type RequestId = u64;

/// One request as the queue sees it.
///
/// The handler is taken by the first terminal callback, so `on_complete`,
/// `on_upgrade` and `on_error` together fire at most once. Dropping a record
/// whose handler was never settled reports [`ClientError::ClientDestroyed`].
pub(crate) struct RequestRecord {
    pub(crate) id: RequestId,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) host: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) content_length: Option<u64>,
    pub(crate) idempotent: bool,
    pub(crate) upgrade: Option<String>,
    pub(crate) servername: Option<String>,
    pub(crate) deadline: Option<Instant>,
    aborted: bool,
    abandoned: bool,
    headers_received: bool,
    streamed: bool,
    handler: Option<Box<dyn Handler>>,
}

impl RequestRecord {
    pub(crate) fn new(
        id: RequestId,
        parts: RequestParts,
        default_host: &str,
        handler: Box<dyn Handler>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            id,
            method: parts.method,
            path: parts.path,
            host: parts.host.unwrap_or_else(|| default_host.to_owned()),
            headers: parts.headers,
            body: parts.body,
            content_length: parts.content_length,
            idempotent: parts.idempotent,
            upgrade: parts.upgrade,
            servername: parts.servername,
            deadline,
            aborted: false,
            abandoned: false,
            headers_received: false,
            streamed: false,
            handler: Some(handler),
        }
    }

    /// `CONNECT` always hands over the socket.
    pub(crate) fn is_upgrade(&self) -> bool {
        self.upgrade.is_some() || self.method == Method::CONNECT
    }

    pub(crate) fn has_stream_body(&self) -> bool {
        self.body.is_stream()
    }

    /// Requests that cannot share the connection with requests behind them.
    pub(crate) fn is_barrier(&self) -> bool {
        !self.idempotent
            || self.is_upgrade()
            || self.has_stream_body()
            || h1pipe_core::forces_reset(&self.method)
    }

    /// Move a streaming body out for writing. The record can no longer be
    /// replayed afterwards.
    pub(crate) fn take_stream(&mut self) -> Option<BodyStream> {
        match mem::take(&mut self.body) {
            RequestBody::Streaming(stream) => {
                self.streamed = true;
                Some(stream)
            }
            other => {
                self.body = other;
                None
            }
        }
    }

    /// Safe to write again on a fresh connection.
    pub(crate) fn can_retry(&self) -> bool {
        self.idempotent && !self.streamed && !self.headers_received && !self.is_settled()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Aborted, or already given its terminal callback.
    pub(crate) fn is_settled(&self) -> bool {
        self.aborted || self.handler.is_none()
    }

    pub(crate) fn headers_received(&self) -> bool {
        self.headers_received
    }

    pub(crate) fn timed_out(&self, now: Instant) -> bool {
        !self.headers_received && !self.is_settled() && self.deadline.is_some_and(|d| d <= now)
    }

    /// Deadline still able to fire.
    pub(crate) fn live_deadline(&self) -> Option<Instant> {
        if self.headers_received || self.is_settled() {
            None
        } else {
            self.deadline
        }
    }

    pub(crate) fn on_headers(&mut self, status: StatusCode, headers: &HeaderMap, resume: Resumer) -> Flow {
        let informational = status.is_informational();
        if !informational {
            self.headers_received = true;
        }
        match self.handler.as_mut() {
            Some(handler) if !self.abandoned => {
                let flow = handler.on_headers(status, headers, resume);
                if informational {
                    return Flow::Continue;
                }
                if flow == Flow::Discard {
                    self.abandoned = true;
                }
                flow
            }
            _ => Flow::Discard,
        }
    }

    pub(crate) fn on_body(&mut self, chunk: Bytes) -> Flow {
        match self.handler.as_mut() {
            Some(handler) if !self.abandoned => {
                let flow = handler.on_body(chunk);
                if flow == Flow::Discard {
                    self.abandoned = true;
                }
                flow
            }
            _ => Flow::Discard,
        }
    }

    pub(crate) fn on_complete(&mut self, trailers: HeaderMap) {
        if let Some(mut handler) = self.handler.take() {
            handler.on_complete(trailers);
        }
    }

    pub(crate) fn on_upgrade(&mut self, status: StatusCode, headers: HeaderMap, socket: Upgraded) {
        if let Some(mut handler) = self.handler.take() {
            handler.on_upgrade(status, headers, socket);
        }
    }

    pub(crate) fn on_error(&mut self, err: ClientError) {
        if let Some(mut handler) = self.handler.take() {
            handler.on_error(err);
        }
    }

    /// Fail the request and have the queue skip it.
    pub(crate) fn fail(&mut self, err: ClientError) {
        self.aborted = true;
        self.on_error(err);
    }

    /// Fail a request that is already on the wire. Its response is still read
    /// and dropped to keep the connection in sync.
    pub(crate) fn abandon(&mut self, err: ClientError) {
        self.abandoned = true;
        self.on_error(err);
    }

    /// Drop without notifying the handler.
    pub(crate) fn disarm(mut self) {
        self.handler = None;
    }
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        self.on_error(ClientError::ClientDestroyed);
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("idempotent", &self.idempotent)
            .field("aborted", &self.aborted)
            .field("abandoned", &self.abandoned)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::RequestOptions;

    #[test]
    fn test_terminal_callback_fires_once() {
        let (mut record, recorder) = record(1, RequestOptions::get("/"));
        record.on_complete(HeaderMap::new());
        record.on_error(ClientError::RequestAborted);
        drop(record);
        assert_eq!(recorder.events(), vec![Seen::Complete]);
    }

    #[test]
    fn test_drop_reports_destroyed() {
        let (record, recorder) = record(1, RequestOptions::get("/"));
        drop(record);
        assert_eq!(
            recorder.events(),
            vec![Seen::Error(ClientError::ClientDestroyed.to_string())]
        );
    }

    #[test]
    fn test_disarm_is_silent() {
        let (record, recorder) = record(1, RequestOptions::get("/"));
        record.disarm();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_barriers() {
        assert!(!record(1, RequestOptions::get("/")).0.is_barrier());
        assert!(record(1, RequestOptions::post("/")).0.is_barrier());
        assert!(record(1, RequestOptions::head("/")).0.is_barrier());
        assert!(record(1, RequestOptions::get("/").upgrade("websocket")).0.is_barrier());
        assert!(record(1, RequestOptions::connect("example.com:443")).0.is_barrier());
        assert!(!record(1, RequestOptions::put("/").idempotent(true)).0.is_barrier());
    }

    #[test]
    fn test_abandoned_record_discards_body() {
        let (mut record, recorder) = record(1, RequestOptions::get("/"));
        record.abandon(ClientError::RequestTimeout);
        assert!(record.is_settled());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(
            record.on_headers(StatusCode::OK, &HeaderMap::new(), Resumer::new(tx, 1)),
            Flow::Discard
        );
        assert_eq!(record.on_body(Bytes::from("x")), Flow::Discard);
        assert_eq!(
            recorder.events(),
            vec![Seen::Error(ClientError::RequestTimeout.to_string())]
        );
    }

    /// Returns `Discard` for every head, including interim ones.
    struct DiscardHeads(Recorder);

    impl Handler for DiscardHeads {
        fn on_headers(&mut self, status: StatusCode, headers: &HeaderMap, resume: Resumer) -> Flow {
            self.0.on_headers(status, headers, resume);
            if status.is_informational() {
                Flow::Discard
            } else {
                Flow::Continue
            }
        }

        fn on_body(&mut self, chunk: Bytes) -> Flow {
            self.0.on_body(chunk)
        }

        fn on_complete(&mut self, trailers: HeaderMap) {
            self.0.on_complete(trailers);
        }

        fn on_upgrade(&mut self, status: StatusCode, headers: HeaderMap, socket: Upgraded) {
            self.0.on_upgrade(status, headers, socket);
        }

        fn on_error(&mut self, error: ClientError) {
            self.0.on_error(error);
        }
    }

    #[test]
    fn test_informational_flow_is_ignored() {
        let recorder = Recorder::default();
        let parts = RequestOptions::get("/").into_parts().unwrap();
        let handler = Box::new(DiscardHeads(recorder.clone()));
        let mut record = RequestRecord::new(1, parts, "localhost", handler, None);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let early = StatusCode::from_u16(103).unwrap();
        assert_eq!(
            record.on_headers(early, &HeaderMap::new(), Resumer::new(tx.clone(), 1)),
            Flow::Continue
        );
        assert!(!record.headers_received());

        assert_eq!(
            record.on_headers(StatusCode::OK, &HeaderMap::new(), Resumer::new(tx, 1)),
            Flow::Continue
        );
        assert_eq!(record.on_body(Bytes::from("ok")), Flow::Continue);
        record.on_complete(HeaderMap::new());
        assert_eq!(
            recorder.events(),
            vec![
                Seen::Headers(103),
                Seen::Headers(200),
                Seen::Body(Bytes::from("ok")),
                Seen::Complete
            ]
        );
    }

    #[test]
    fn test_take_stream() {
        let body = RequestBody::streaming(futures::stream::empty());
        let (mut streamed, _) = record(1, RequestOptions::put("/").body(body));
        assert!(streamed.can_retry());
        assert!(streamed.take_stream().is_some());
        assert!(!streamed.has_stream_body());
        assert!(!streamed.can_retry());

        let (mut fixed, _) = record(2, RequestOptions::put("/").body("hi"));
        assert!(fixed.take_stream().is_none());
        assert_eq!(fixed.body.exact_len(), Some(2));
    }

    #[test]
    fn test_default_host() {
        let (plain, _) = record(1, RequestOptions::get("/"));
        assert_eq!(plain.host, "localhost");

        let (overridden, _) = record(2, RequestOptions::get("/").header("host", "api.internal"));
        assert_eq!(overridden.host, "api.internal");
    }

    #[tokio::test]
    async fn test_deadline() {
        let recorder = Recorder::default();
        let parts = RequestOptions::get("/").into_parts().unwrap();
        let now = Instant::now();
        let mut record = RequestRecord::new(1, parts, "localhost", Box::new(recorder), Some(now));
        assert!(record.timed_out(now));
        assert_eq!(record.live_deadline(), Some(now));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        record.on_headers(StatusCode::OK, &HeaderMap::new(), Resumer::new(tx, 1));
        assert!(!record.timed_out(now));
        assert_eq!(record.live_deadline(), None);
    }
}
