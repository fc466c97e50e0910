//! Handler trait and type erasure.
//!
//! # One shape for middleware and handlers
//!
//! Middleware and route handlers are the same thing: an async function that
//! receives the request [`Context`] and returns `Result<()>`. A middleware
//! calls [`Context::next`] to run the rest of the chain; a handler is simply
//! the last element, so there is nothing left for it to call.
//!
//! The router stores every element of every chain as a [`BoxedHandler`]:
//!
//! ```text
//! fn auth(ctx: &mut Context) -> BoxFuture<'_, Result<()>> { … }  ← user writes this
//!        ↓ router.use_middleware(auth)
//! Arc::new(auth)                                                 ← blanket Handler impl
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! handler.handle(ctx)  at request time                           ← one vtable dispatch
//! ```
//!
//! Closures need a nudge so the compiler can infer the higher-ranked
//! signature; wrap them in [`handler_fn`]:
//!
//! ```rust
//! use switchyard::{handler_fn, Router, StatusCode};
//!
//! let router = Router::new();
//! router.get("/ping", handler_fn(|ctx| Box::pin(async move {
//!     ctx.text(StatusCode::OK, "pong");
//!     Ok(())
//! })));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// A heap-allocated, type-erased future borrowing from its caller.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A chain element: middleware or terminal handler.
///
/// Implemented automatically for every function of the shape
/// `fn(&mut Context) -> BoxFuture<'_, Result<()>>`. Implement it by hand for
/// middleware that carries configuration:
///
/// ```rust
/// use switchyard::{Context, Error, Handler, Result, StatusCode};
///
/// struct RequireHeader(&'static str);
///
/// #[switchyard::async_trait]
/// impl Handler for RequireHeader {
///     async fn handle(&self, ctx: &mut Context) -> Result<()> {
///         if ctx.header(self.0).is_none() {
///             ctx.abort();
///             return Err(Error::with_status(StatusCode::UNAUTHORIZED, "missing credentials"));
///         }
///         ctx.next().await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context) -> Result<()>;
}

/// A type-erased chain element shared by every request matching its route.
pub type BoxedHandler = Arc<dyn Handler>;

#[async_trait]
impl Handler for BoxedHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        (**self).handle(ctx).await
    }
}

#[async_trait]
impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        (self)(ctx).await
    }
}

/// Pins a closure to the handler signature so its borrow of the context can
/// be inferred.
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    f
}

/// Erases a handler into the shared form the router stores.
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    Arc::new(handler)
}
