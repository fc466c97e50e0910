//! Unified error type.
//!
//! Every fallible operation in switchyard returns [`Error`]. The variants are
//! the error *classes* the request contract knows about; each maps onto one
//! HTTP status through [`Error::status`], which is what the engine-level error
//! handler uses when nothing was committed downstream.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;

use http::StatusCode;
use thiserror::Error;

use crate::engine::Capability;

/// Boxed, thread-safe error used as the `source` of wrapped failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Result` alias with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed binding input: bad JSON, unparsable query, broken multipart.
    #[error("decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Well-formed input that violates declared field constraints.
    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Missing cookie, form file, static file or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// Raised by application code, optionally carrying the status to answer with.
    #[error("{message}")]
    Handler {
        status: Option<StatusCode>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Engine lifecycle transition problems (already running, frozen routes,
    /// forced shutdown).
    #[error("shutdown: {0}")]
    Shutdown(String),

    /// The serving backend cannot provide a requested capability.
    #[error("{adapter} adapter does not support {capability}")]
    AdapterLimitation {
        adapter: &'static str,
        capability: Capability,
    },

    /// Invalid configuration or route registration.
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn decode(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Decode { message: message.into(), source: Some(source.into()) }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Application error answered with `500 Internal Server Error`.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler { status: None, message: message.into(), source: None }
    }

    /// Application error answered with an explicit status.
    ///
    /// ```rust
    /// use switchyard::{Error, StatusCode};
    ///
    /// let err = Error::with_status(StatusCode::FORBIDDEN, "admins only");
    /// assert_eq!(err.status(), StatusCode::FORBIDDEN);
    /// ```
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Handler { status: Some(status), message: message.into(), source: None }
    }

    pub(crate) fn internal(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Handler { status: None, message: message.into(), source: Some(source.into()) }
    }

    /// The HTTP status this error is answered with when it reaches the
    /// engine-level error handler.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode { .. } => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Handler { status, .. } => status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AdapterLimitation { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Field name → failed rule codes, for validation errors only.
    pub fn field_errors(&self) -> Option<HashMap<String, Vec<String>>> {
        let Self::Validation(errors) = self else { return None };
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let codes = errs.iter().map(|e| e.code.to_string()).collect();
                (field.to_string(), codes)
            })
            .collect();
        Some(fields)
    }

    /// Converts a caught panic payload into a `500` handler error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message: Cow<'static, str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Cow::Borrowed(s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Cow::Owned(s.clone())
        } else {
            Cow::Borrowed("unknown panic")
        };
        Self::handler(format!("handler panicked: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::not_found("cookie `sid`").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::handler("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            Error::with_status(StatusCode::IM_A_TEAPOT, "short and stout").status(),
            StatusCode::IM_A_TEAPOT
        );
        assert_eq!(Error::Shutdown("closed".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        let limitation = Error::AdapterLimitation { adapter: "axum", capability: Capability::ForceClose };
        assert_eq!(limitation.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(limitation.to_string(), "axum adapter does not support force-close");
    }

    #[test]
    fn panic_payloads() {
        let err = Error::from_panic(Box::new("static message"));
        assert_eq!(err.to_string(), "handler panicked: static message");

        let err = Error::from_panic(Box::new(String::from("owned message")));
        assert_eq!(err.to_string(), "handler panicked: owned message");

        let err = Error::from_panic(Box::new(42_u8));
        assert_eq!(err.to_string(), "handler panicked: unknown panic");
    }

    #[test]
    fn handler_display_is_message() {
        assert_eq!(Error::handler("boom").to_string(), "boom");
    }
}
