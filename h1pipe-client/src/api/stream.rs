use std::fmt;

use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ClientError;
use crate::client::Client;
use crate::config::{Opaque, RequestOptions};

/// Response head handed to the sink factory of [`Client::stream`].
pub struct StreamHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub opaque: Option<Opaque>,
}

impl fmt::Debug for StreamHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHead")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`Client::stream`] once the body was written out.
pub struct StreamData {
    pub opaque: Option<Opaque>,
    pub trailers: HeaderMap,
}

impl fmt::Debug for StreamData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamData")
            .field("trailers", &self.trailers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Send a request and copy its body into the writer `factory` builds from
    /// the response head.
    ///
    /// A write error aborts the copy with [`ClientError::Body`]; the rest of
    /// the response is discarded. The writer is shut down after the last
    /// chunk.
    ///
    /// ```ignore
    /// let file = tokio::fs::File::create("dump.bin").await?;
    /// let done = client
    ///     .stream(RequestOptions::get("/export"), move |head| {
    ///         assert_eq!(head.status, 200);
    ///         file
    ///     })
    ///     .await?;
    /// ```
    pub async fn stream<F, W>(
        &self,
        options: RequestOptions,
        factory: F,
    ) -> Result<StreamData, ClientError>
    where
        F: FnOnce(StreamHead) -> W,
        W: AsyncWrite + Unpin,
    {
        let response = self.request(options).await?;
        let opaque = response.opaque;
        let mut body = response.body;
        let mut sink = factory(StreamHead {
            status: response.status,
            headers: response.headers,
            opaque: opaque.clone(),
        });

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await.map_err(sink_error)?;
        }
        sink.shutdown().await.map_err(sink_error)?;

        Ok(StreamData {
            opaque,
            trailers: body.trailers().cloned().unwrap_or_default(),
        })
    }
}

fn sink_error(err: std::io::Error) -> ClientError {
    tracing::debug!(error = %err, "response sink failed");
    ClientError::body(err.to_string())
}
