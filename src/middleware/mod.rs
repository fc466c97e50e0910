//! Built-in middleware.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. Register these like any other chain element,
//! usually engine-wide so they also see unmatched requests:
//!
//! ```rust,no_run
//! use switchyard::middleware::{RequestId, Trace};
//! use switchyard::{boxed, Engine, EngineConfig, HyperEngine, Router};
//!
//! # fn main() -> switchyard::Result<()> {
//! let engine = HyperEngine::new(EngineConfig::default(), Router::new());
//! engine.use_middleware(boxed(RequestId::default()))?;
//! engine.use_middleware(boxed(Trace))?;
//! # Ok(())
//! # }
//! ```
//!
//! - [`Trace`]: one log event per request with method, path, status, latency
//! - [`RequestId`]: reads or generates `X-Request-Id` and echoes it back

mod request_id;
mod trace;

pub use request_id::{REQUEST_ID_HEADER, RequestId};
pub use trace::Trace;
