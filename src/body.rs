//! Lazy request-body access.
//!
//! The body is collected on the first read and cached. Later reads through
//! [`Context::body_raw`], [`Context::body_reader`], the form accessors or the
//! binders all see the same bytes. This holds for every adapter.

use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Collected, LengthLimitError, Limited};

use crate::context::Context;
use crate::error::{BoxError, Error, Result};

pub(crate) struct RequestBody {
    state: BodyState,
    limit: usize,
}

enum BodyState {
    Pending(UnsyncBoxBody<Bytes, BoxError>),
    Cached(Bytes),
    Failed(String),
}

impl RequestBody {
    /// Wraps a backend body; at most `limit` bytes will be collected.
    pub(crate) fn new<B>(body: B, limit: usize) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { state: BodyState::Pending(body.map_err(Into::into).boxed_unsync()), limit }
    }

    async fn bytes(&mut self) -> Result<Bytes> {
        let pending = match std::mem::replace(&mut self.state, BodyState::Cached(Bytes::new())) {
            BodyState::Pending(body) => body,
            BodyState::Cached(bytes) => {
                self.state = BodyState::Cached(bytes.clone());
                return Ok(bytes);
            }
            BodyState::Failed(message) => {
                self.state = BodyState::Failed(message.clone());
                return Err(Error::Decode { message, source: None });
            }
        };

        let collect: Pin<Box<dyn Future<Output = std::result::Result<Collected<Bytes>, BoxError>> + Send>> =
            Box::pin(Limited::new(pending, self.limit).collect());
        match collect.await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                self.state = BodyState::Cached(bytes.clone());
                Ok(bytes)
            }
            Err(e) => {
                let message = if e.downcast_ref::<LengthLimitError>().is_some() {
                    format!("request body exceeds {} bytes", self.limit)
                } else {
                    format!("failed to read request body: {e}")
                };
                self.state = BodyState::Failed(message.clone());
                Err(Error::Decode { message, source: Some(e) })
            }
        }
    }
}

impl Context {
    /// The complete request body.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] when the body cannot be read or exceeds the engine's
    /// `max_body_bytes`. The failure is sticky: later reads fail the same way.
    pub async fn body_raw(&mut self) -> Result<Bytes> {
        self.body.bytes().await
    }

    /// The request body as an [`AsyncRead`](tokio::io::AsyncRead).
    pub async fn body_reader(&mut self) -> Result<Cursor<Bytes>> {
        Ok(Cursor::new(self.body.bytes().await?))
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use futures_util::stream;
    use http_body::Frame;
    use http_body_util::{Full, StreamBody};
    use tokio::io::AsyncReadExt;

    use super::RequestBody;
    use crate::context::testing::context;
    use crate::error::Error;

    fn post(body: &'static str) -> http::Request<Bytes> {
        http::Request::post("/").body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn body_is_cached_after_first_read() {
        let mut ctx = context(post("payload"), Vec::new());

        assert_eq!(ctx.body_raw().await.unwrap(), "payload");
        assert_eq!(ctx.body_raw().await.unwrap(), "payload");

        let mut text = String::new();
        ctx.body_reader().await.unwrap().read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "payload");
    }

    #[tokio::test]
    async fn chunked_body_is_collected() {
        let chunks = stream::iter(["he", "ll", "o"].map(|c| Ok::<_, Infallible>(Frame::data(Bytes::from(c)))));
        let mut body = RequestBody::new(StreamBody::new(chunks), 64);

        assert_eq!(body.bytes().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_and_stays_rejected() {
        let mut body = RequestBody::new(Full::new(Bytes::from_static(b"0123456789")), 4);

        let err = body.bytes().await.unwrap_err();
        assert!(matches!(&err, Error::Decode { message, .. } if message == "request body exceeds 4 bytes"));
        assert!(matches!(body.bytes().await, Err(Error::Decode { .. })));
    }
}
