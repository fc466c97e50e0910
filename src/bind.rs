//! Typed binding of request data.
//!
//! Every binder decodes exactly one source and then runs the target's
//! [`Validate`] rules:
//!
//! | Binder | Source | Decoder |
//! |---|---|---|
//! | [`bind_json`](Context::bind_json) | body | `serde_json` |
//! | [`bind_query`](Context::bind_query) | query string | `serde_qs` |
//! | [`bind_form`](Context::bind_form) | urlencoded / multipart text fields | `serde_urlencoded` |
//! | [`bind_uri`](Context::bind_uri) | path parameters | `serde_urlencoded` |
//! | [`bind_header`](Context::bind_header) | headers (lower-case names) | `serde_urlencoded` |
//!
//! Malformed input fails with [`Error::Decode`]; a constraint violation fails
//! with [`Error::Validation`].
//!
//! ```rust,ignore
//! #[derive(Deserialize, Validate)]
//! struct CreateUser {
//!     #[validate(length(min = 2))]
//!     name: String,
//! }
//!
//! async fn create(ctx: &mut Context) -> Result<()> {
//!     let input: CreateUser = ctx.bind_json().await?;
//!     ctx.json(StatusCode::CREATED, &json!({ "name": input.name }))
//! }
//! ```

use serde::de::DeserializeOwned;
use validator::Validate;

use crate::context::Context;
use crate::error::{Error, Result};

impl Context {
    pub async fn bind_json<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let body = self.body_raw().await?;
        let value = serde_json::from_slice(&body).map_err(|e| Error::decode("invalid JSON body", e))?;
        validated(value)
    }

    pub fn bind_query<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let value = serde_qs::from_str(self.raw_query()).map_err(|e| Error::decode("invalid query string", e))?;
        validated(value)
    }

    pub async fn bind_form<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let form = self.parsed_form().await?;
        let pairs = form.values.iter().filter_map(|(k, vs)| vs.first().map(|v| (k.as_str(), v.as_str())));
        decode_pairs(pairs, "invalid form data")
    }

    pub fn bind_uri<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        decode_pairs(self.params().iter(), "invalid path parameters")
    }

    /// Binds headers by lower-case name; for repeated headers the first value
    /// is used.
    pub fn bind_header<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        for (name, value) in self.headers() {
            let Ok(value) = value.to_str() else { continue };
            if !pairs.iter().any(|(seen, _)| *seen == name.as_str()) {
                pairs.push((name.as_str(), value));
            }
        }
        decode_pairs(pairs, "invalid headers")
    }
}

/// Decodes string pairs through the urlencoded deserializer so that numbers,
/// booleans and options parse the same way for every string source.
fn decode_pairs<'a, T>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>, what: &str) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    let encoded = serde_urlencoded::to_string(&pairs).map_err(|e| Error::decode(what, e))?;
    let value = serde_urlencoded::from_str(&encoded).map_err(|e| Error::decode(what, e))?;
    validated(value)
}

fn validated<T: Validate>(value: T) -> Result<T> {
    value.validate()?;
    Ok(value)
}
