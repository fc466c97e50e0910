//! HTTP methods a route can be registered for.
//!
//! RFC 9110 methods, the WebDAV family (RFC 4918 / 4791 / 3253 / 5323) and
//! `PURGE`. Everything beyond the RFC 9110 set except `CONNECT` is an
//! extended method: routing it needs
//! [`Capability::ExtendedMethods`](crate::Capability::ExtendedMethods).
//! A request whose method is not listed here never matches a route.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
    Copy,
    Lock,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
    Unlock,
    Mkcalendar,
    Report,
    Search,
    Purge,
}

/// Wire names, in declaration order.
const WIRE: [(Method, &str); 20] = [
    (Method::Connect, "CONNECT"),
    (Method::Delete, "DELETE"),
    (Method::Get, "GET"),
    (Method::Head, "HEAD"),
    (Method::Options, "OPTIONS"),
    (Method::Patch, "PATCH"),
    (Method::Post, "POST"),
    (Method::Put, "PUT"),
    (Method::Trace, "TRACE"),
    (Method::Copy, "COPY"),
    (Method::Lock, "LOCK"),
    (Method::Mkcol, "MKCOL"),
    (Method::Move, "MOVE"),
    (Method::Propfind, "PROPFIND"),
    (Method::Proppatch, "PROPPATCH"),
    (Method::Unlock, "UNLOCK"),
    (Method::Mkcalendar, "MKCALENDAR"),
    (Method::Report, "REPORT"),
    (Method::Search, "SEARCH"),
    (Method::Purge, "PURGE"),
];

impl Method {
    pub fn as_str(self) -> &'static str {
        WIRE[self as usize].1
    }

    /// Every backend can route this method.
    pub fn is_standard(self) -> bool {
        matches!(
            self,
            Self::Delete | Self::Get | Self::Head | Self::Options | Self::Patch | Self::Post | Self::Put | Self::Trace
        )
    }
}

/// Method names are case-sensitive (RFC 9110 §9.1).
impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WIRE.iter()
            .find(|(_, wire)| *wire == s)
            .map(|(method, _)| *method)
            .ok_or_else(|| Error::Config(format!("unknown HTTP method `{s}`")))
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = Error;

    fn try_from(method: &http::Method) -> Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
