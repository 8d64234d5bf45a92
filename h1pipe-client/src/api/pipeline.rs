use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;

use crate::ClientError;
use crate::client::Client;
use crate::config::RequestOptions;
use crate::transport::RequestBody;
use super::request::ResponseFuture;

const BODY_CHANNEL_CAPACITY: usize = 8;

/// Writable half of a [`Pipeline`]: feeds the request body.
///
/// Dropping the sender ends the body. [`abort`](Self::abort) fails it
/// instead, which tears the connection down.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::Sender<Result<Bytes, ClientError>>,
}

impl BodySender {
    /// Send one chunk. Waits while the connection is not pulling.
    pub async fn send(&mut self, chunk: impl Into<Bytes>) -> Result<(), ClientError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| ClientError::body("request body is no longer read"))
    }

    pub fn finish(self) {}

    pub fn abort(mut self, reason: ClientError) {
        let _ = self.tx.try_send(Err(reason));
    }
}

/// A request whose body is written while the response is read.
#[derive(Debug)]
pub struct Pipeline {
    pub body: BodySender,
    pub response: ResponseFuture,
}

impl Client {
    /// Dispatch a request with a streaming body fed through
    /// [`Pipeline::body`].
    ///
    /// The request is queued right away. Since its body streams, it is never
    /// pipelined behind another request.
    ///
    /// ```ignore
    /// let Pipeline { mut body, response } = client.pipeline(RequestOptions::post("/echo"))?;
    /// body.send("hello").await?;
    /// body.finish();
    /// let echoed = response.await?.body.collect().await?;
    /// ```
    pub fn pipeline(&self, options: RequestOptions) -> Result<Pipeline, ClientError> {
        if !matches!(options.body, RequestBody::Empty) {
            return Err(ClientError::invalid_argument(
                "pipeline body is written through the body sender",
            ));
        }
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let response = self.send(options.body(RequestBody::streaming(rx)))?;
        Ok(Pipeline {
            body: BodySender { tx },
            response,
        })
    }
}
