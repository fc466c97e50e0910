//! The buffered outbound response and the responder methods on [`Context`].
//!
//! Nothing is written to the wire while the chain runs. Responder calls fill
//! one [`Response`] held by the context; the adapter converts it into the
//! backend's native response after the chain and the error handler are done.
//!
//! The first committing call (`status`, `json`, `text`, `no_content`, `bytes`,
//! `data_from_reader`, `file`, `redirect`) wins. Later commits are ignored and
//! logged at `warn`. Headers and cookies accumulate until the commit; after it
//! they are ignored the same way.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use cookie::Cookie;
use futures_util::TryStreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::StatusCode;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::StreamBody;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::context::Context;
use crate::error::{Error, Result};

/// The response a request will be answered with.
///
/// Until something commits it, a response is `200 OK` with an empty body plus
/// whatever headers were set so far.
#[derive(Debug, Default)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    committed: bool,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// The body, if it is held in memory. Streamed bodies return `None`.
    pub fn body_bytes(&self) -> Option<Bytes> {
        match &self.body.inner {
            Kind::Once(bytes) => Some(bytes.clone().unwrap_or_default()),
            Kind::Stream(_) => None,
        }
    }

    pub(crate) fn into_http(self) -> http::Response<ResponseBody> {
        let mut res = http::Response::new(self.body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

/// Response body handed to the serving backend: in-memory bytes or a stream.
pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(UnsyncBoxBody<Bytes, io::Error>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() { Self::empty() } else { Self { inner: Kind::Once(Some(bytes)) } }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = io::Error> + Send + 'static,
    {
        Self { inner: Kind::Stream(UnsyncBoxBody::new(body)) }
    }

    fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::stream(StreamBody::new(ReaderStream::new(reader).map_ok(Frame::data)))
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Kind::Once(bytes) => f.debug_tuple("Once").field(bytes).finish(),
            Kind::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            Kind::Stream(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(bytes) => bytes.is_none(),
            Kind::Stream(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(body) => body.size_hint(),
        }
    }
}

impl Context {
    /// Commits `status` with an empty body.
    pub fn status(&mut self, status: StatusCode) {
        self.commit(status, None, ResponseBody::empty());
    }

    /// Commits `value` serialized as JSON, with `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// A `500` [`Error::Handler`] when `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value).map_err(|e| Error::internal("failed to serialize response", e))?;
        let content_type = HeaderValue::from_static("application/json");
        self.commit(status, Some(content_type), ResponseBody::once(body));
        Ok(())
    }

    /// Commits a `text/plain; charset=utf-8` body.
    pub fn text(&mut self, status: StatusCode, body: impl Into<String>) {
        let content_type = HeaderValue::from_static("text/plain; charset=utf-8");
        self.commit(status, Some(content_type), ResponseBody::once(body.into()));
    }

    pub fn no_content(&mut self, status: StatusCode) {
        self.commit(status, None, ResponseBody::empty());
    }

    /// Commits raw bytes with an explicit content type.
    pub fn bytes(&mut self, status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Result<()> {
        let content_type = header_value(content_type)?;
        self.commit(status, Some(content_type), ResponseBody::once(body));
        Ok(())
    }

    /// Commits a body streamed from `reader`.
    pub fn data_from_reader<R>(&mut self, status: StatusCode, content_type: &str, reader: R) -> Result<()>
    where
        R: AsyncRead + Send + 'static,
    {
        let content_type = header_value(content_type)?;
        self.commit(status, Some(content_type), ResponseBody::reader(reader));
        Ok(())
    }

    /// Commits the file at `path` with `200 OK`, guessing the content type
    /// from its extension.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when `path` does not exist or is not a regular file.
    pub async fn file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("file `{}`", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(Error::not_found(format!("file `{}`", path.display())));
        }

        let content_type = header_value(content_type_for(path).as_ref())?;
        if !self.response.committed {
            self.response.headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        }
        self.commit(StatusCode::OK, Some(content_type), ResponseBody::reader(file));
        Ok(())
    }

    /// Commits a redirect to `location`.
    ///
    /// # Errors
    ///
    /// A `500` [`Error::Handler`] when `status` is not a 3xx code or the
    /// location is not a valid header value.
    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Result<()> {
        if !status.is_redirection() {
            return Err(Error::handler(format!("redirect requires a 3xx status, got {status}")));
        }
        let location = header_value(location)?;
        if !self.response.committed {
            self.response.headers.insert(LOCATION, location);
        }
        self.commit(status, None, ResponseBody::empty());
        Ok(())
    }

    /// Sets (replaces) a response header.
    ///
    /// Ignored with a warning once the response is committed.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::try_from(name).map_err(|e| Error::internal("invalid header name", e))?;
        let value = header_value(value)?;
        if self.late_write("header", name.as_str()) {
            return Ok(());
        }
        self.response.headers.insert(name, value);
        Ok(())
    }

    /// Appends a `Set-Cookie` header.
    ///
    /// Ignored with a warning once the response is committed.
    pub fn set_cookie(&mut self, cookie: Cookie<'_>) -> Result<()> {
        let value = header_value(&cookie.to_string())?;
        if self.late_write("cookie", cookie.name()) {
            return Ok(());
        }
        self.response.headers.append(SET_COOKIE, value);
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.response.committed
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    fn commit(&mut self, status: StatusCode, content_type: Option<HeaderValue>, body: ResponseBody) {
        if self.response.committed {
            warn!(
                path = %self.path(),
                committed = %self.response.status,
                ignored = %status,
                "response already committed, ignoring write"
            );
            return;
        }

        let response = &mut self.response;
        response.status = status;
        if let Some(content_type) = content_type {
            response.headers.insert(CONTENT_TYPE, content_type);
        }
        response.body = body;
        response.committed = true;
    }

    fn late_write(&self, what: &str, name: &str) -> bool {
        if self.response.committed {
            warn!(path = %self.path(), %what, %name, "response already committed, ignoring {what}");
        }
        self.response.committed
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(|e| Error::internal("invalid header value", e))
}

fn content_type_for(path: &Path) -> mime::Mime {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("js" | "mjs") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("json") => mime::APPLICATION_JSON,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("csv") => mime::TEXT_CSV_UTF_8,
        Some("xml") => mime::TEXT_XML,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        Some("pdf") => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// Collects a response body; test helper shared with the adapter tests.
#[cfg(test)]
pub(crate) async fn collect(body: ResponseBody) -> Bytes {
    use http_body_util::BodyExt;

    body.collect().await.map(|c| c.to_bytes()).unwrap_or_default()
}
