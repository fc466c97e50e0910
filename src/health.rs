//! Built-in Kubernetes health-check handlers.
//!
//! Kubernetes asks two questions. switchyard answers them.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! Register them on your router:
//!
//! ```rust,no_run
//! use switchyard::{health, Router};
//!
//! let router = Router::new();
//! router.get("/healthz", health::liveness).get("/readyz", health::readiness);
//! ```
//!
//! Override `readiness` with a custom handler if you need to gate on
//! dependency availability (database connections, downstream services, etc.):
//!
//! ```rust,no_run
//! use switchyard::{BoxFuture, Context, Error, Result, StatusCode};
//!
//! fn readiness(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
//!     Box::pin(async move {
//!         if !dependencies_are_healthy().await {
//!             return Err(Error::with_status(StatusCode::SERVICE_UNAVAILABLE, "warming up"));
//!         }
//!         ctx.text(StatusCode::OK, "ready");
//!         Ok(())
//!     })
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use http::StatusCode;

use crate::context::Context;
use crate::error::Result;
use crate::handler::BoxFuture;

/// Kubernetes liveness probe handler.
///
/// Always returns `200 OK` with body `"ok"`. If the process can respond to
/// HTTP at all, it is alive.
pub fn liveness(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.text(StatusCode::OK, "ok");
        Ok(())
    })
}

/// Kubernetes readiness probe handler (default implementation).
///
/// Returns `200 OK` with body `"ready"`.
pub fn readiness(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.text(StatusCode::OK, "ready");
        Ok(())
    })
}
