//! Read-only request accessors.
//!
//! Everything here is side-effect free: call any accessor any number of times,
//! in any order, and get the same answer. Body and form access lives in
//! [`body`](crate::body) and [`form`](crate::form) because it reads lazily.

use std::net::{IpAddr, SocketAddr};

use cookie::Cookie;
use http::header::{COOKIE, HeaderMap};
use http::request::Parts;
use http::{Method, Uri};

use crate::context::Context;
use crate::error::{Error, Result};

/// The request line, headers and routing results an adapter hands to the core.
pub(crate) struct RequestHead {
    parts: Parts,
    params: Params,
    full_path: String,
    peer: Option<SocketAddr>,
}

impl RequestHead {
    pub(crate) fn new(parts: Parts, params: Params, full_path: String, peer: Option<SocketAddr>) -> Self {
        Self { parts, params, full_path, peer }
    }
}

/// Path parameters captured by the matched route, in pattern order.
///
/// Values are percent-decoded path segments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Context {
    pub fn method(&self) -> &Method {
        &self.head.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.parts.uri
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.head.parts.uri.path()
    }

    /// The registered pattern of the matched route, e.g. `/users/:id`.
    ///
    /// Empty when no route matched.
    pub fn full_path(&self) -> &str {
        &self.head.full_path
    }

    /// Best-effort client address.
    ///
    /// The first `X-Forwarded-For` entry wins, then `X-Real-IP`, then the
    /// peer address of the connection.
    pub fn client_ip(&self) -> Option<IpAddr> {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        forwarded
            .or_else(|| self.header("x-real-ip").and_then(|v| v.trim().parse().ok()))
            .or_else(|| self.head.peer.map(|peer| peer.ip()))
    }

    /// A path parameter, or `""` when the route has no such parameter.
    pub fn param(&self, name: &str) -> &str {
        self.head.params.get(name).unwrap_or_default()
    }

    pub fn params(&self) -> &Params {
        &self.head.params
    }

    /// The raw query string, without the leading `?`.
    pub fn raw_query(&self) -> &str {
        self.head.parts.uri.query().unwrap_or_default()
    }

    /// The first decoded value of query parameter `name`, or `""`.
    pub fn query(&self, name: &str) -> String {
        self.queries()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }

    /// Every decoded query pair, in order.
    pub fn queries(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(self.raw_query()).unwrap_or_default()
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.parts.headers
    }

    /// The request cookie called `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the request carries no such cookie.
    pub fn cookie(&self, name: &str) -> Result<Cookie<'static>> {
        self.cookies()
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::not_found(format!("cookie `{name}`")))
    }

    /// Every well-formed cookie across all `Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.head
            .parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| Cookie::split_parse(v.to_owned()))
            .filter_map(std::result::Result::ok)
            .collect()
    }
}
