//! Form access: `application/x-www-form-urlencoded` and `multipart/form-data`.
//!
//! Parsing happens once, on the first form accessor call, and reuses the cached
//! body (see [`body`](crate::body)).

use std::collections::HashMap;

use bytes::Bytes;
use http::header::CONTENT_TYPE;

use crate::context::Context;
use crate::error::{Error, Result};

/// Parsed form fields and uploaded files.
#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    pub values: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<FormFile>>,
}

impl MultipartForm {
    /// First value of a text field.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name)?.first().map(String::as_str)
    }

    /// First file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files.get(name)?.first()
    }
}

/// One uploaded file, held in memory.
#[derive(Clone, Debug)]
pub struct FormFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FormFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

enum FormKind {
    UrlEncoded,
    Multipart(String),
    None,
}

impl Context {
    /// First value of form field `name`.
    ///
    /// Looks in the request body form first, then in the query string, and
    /// returns `""` when neither has it. Requests without a form body simply
    /// fall through to the query.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] when the body claims to be a form but cannot be parsed.
    pub async fn form_value(&mut self, name: &str) -> Result<String> {
        if let Some(value) = self.parsed_form().await?.value(name) {
            return Ok(value.to_owned());
        }
        Ok(self.query(name))
    }

    /// The parsed `multipart/form-data` body.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] when the request is not multipart or is malformed.
    pub async fn multipart_form(&mut self) -> Result<&MultipartForm> {
        if !matches!(self.form_kind()?, FormKind::Multipart(_)) {
            return Err(Error::Decode { message: "request is not multipart/form-data".into(), source: None });
        }
        self.parsed_form().await
    }

    /// The first file uploaded under `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the multipart form has no such file.
    pub async fn form_file(&mut self, name: &str) -> Result<FormFile> {
        self.multipart_form()
            .await?
            .file(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("form file `{name}`")))
    }

    pub(crate) async fn parsed_form(&mut self) -> Result<&MultipartForm> {
        if self.form.is_none() {
            let form = match self.form_kind()? {
                FormKind::UrlEncoded => parse_urlencoded(&self.body_raw().await?)?,
                FormKind::Multipart(boundary) => parse_multipart(self.body_raw().await?, boundary).await?,
                FormKind::None => MultipartForm::default(),
            };
            self.form = Some(form);
        }
        Ok(self.form.get_or_insert_with(MultipartForm::default))
    }

    fn form_kind(&self) -> Result<FormKind> {
        let Some(content_type) = self.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return Ok(FormKind::None);
        };
        let Ok(mime) = content_type.parse::<mime::Mime>() else {
            return Ok(FormKind::None);
        };

        if mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
            Ok(FormKind::UrlEncoded)
        } else if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA {
            let boundary = multer::parse_boundary(content_type)
                .map_err(|e| Error::decode("invalid multipart boundary", e))?;
            Ok(FormKind::Multipart(boundary))
        } else {
            Ok(FormKind::None)
        }
    }
}

fn parse_urlencoded(body: &[u8]) -> Result<MultipartForm> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(body).map_err(|e| Error::decode("invalid urlencoded form", e))?;

    let mut form = MultipartForm::default();
    for (name, value) in pairs {
        form.values.entry(name).or_default().push(value);
    }
    Ok(form)
}

async fn parse_multipart(body: Bytes, boundary: String) -> Result<MultipartForm> {
    let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut form = MultipartForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::decode("invalid multipart body", e))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field.bytes().await.map_err(|e| Error::decode("invalid multipart field", e))?;

        if filename.is_some() {
            form.files.entry(name).or_default().push(FormFile { filename, content_type, data });
        } else {
            let value = String::from_utf8_lossy(&data).into_owned();
            form.values.entry(name).or_default().push(value);
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::context::testing::context;
    use crate::error::Error;

    const BOUNDARY: &str = "X-SWITCHYARD-BOUNDARY";

    fn form_request(uri: &str, content_type: &str, body: String) -> http::Request<Bytes> {
        http::Request::post(uri)
            .header("content-type", content_type)
            .body(Bytes::from(body))
            .unwrap()
    }

    fn multipart_body() -> String {
        format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             holiday\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"photo\"; filename=\"beach.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             sand and sea\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        )
    }

    #[tokio::test]
    async fn urlencoded_values_then_query_fallback() {
        let req = form_request(
            "/submit?page=2&name=query",
            "application/x-www-form-urlencoded",
            "name=alice&tags=a&tags=b".into(),
        );
        let mut ctx = context(req, Vec::new());

        assert_eq!(ctx.form_value("name").await.unwrap(), "alice");
        assert_eq!(ctx.form_value("page").await.unwrap(), "2");
        assert_eq!(ctx.form_value("missing").await.unwrap(), "");
        assert!(matches!(ctx.multipart_form().await, Err(Error::Decode { .. })));
    }

    #[tokio::test]
    async fn multipart_fields_and_files() {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let mut ctx = context(form_request("/upload", &content_type, multipart_body()), Vec::new());

        assert_eq!(ctx.form_value("title").await.unwrap(), "holiday");

        let file = ctx.form_file("photo").await.unwrap();
        assert_eq!(file.filename.as_deref(), Some("beach.txt"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.data, "sand and sea");

        assert!(matches!(ctx.form_file("missing").await, Err(Error::NotFound(_))));
        assert_eq!(ctx.multipart_form().await.unwrap().values.len(), 1);
    }

    #[tokio::test]
    async fn body_stays_readable_after_form_parse() {
        let mut ctx = context(
            form_request("/", "application/x-www-form-urlencoded", "a=1".into()),
            Vec::new(),
        );
        assert_eq!(ctx.form_value("a").await.unwrap(), "1");
        assert_eq!(ctx.body_raw().await.unwrap(), "a=1");
    }

    #[tokio::test]
    async fn non_form_body_reads_query_only() {
        let req = form_request("/?a=q", "application/json", r#"{"a":"json"}"#.into());
        let mut ctx = context(req, Vec::new());
        assert_eq!(ctx.form_value("a").await.unwrap(), "q");
    }
}
