//! The engine contract shared by every serving backend.
//!
//! An [`Engine`] owns a [`Router`], engine-global middleware, the error
//! handler and a lifecycle. Adapters differ only in how they accept
//! connections and translate requests; everything a handler can observe is
//! produced by the shared [`Dispatcher`], so the same registration behaves
//! the same on every backend.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::request::Parts;
use serde::Serialize;
use tracing::{debug, error};

use crate::body::RequestBody;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{BoxError, Error, Result};
use crate::handler::BoxedHandler;
use crate::lifecycle::Lifecycle;
use crate::request::RequestHead;
use crate::response::ResponseBody;
use crate::router::{Matched, RouteTable, Router};

/// Optional backend features an engine may or may not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Serving HTTP/2 alongside HTTP/1.1.
    Http2,
    /// Closing connections that outlive the shutdown grace period.
    ForceClose,
    /// Routing methods beyond the RFC 9110 set (WebDAV, `PURGE`, `CONNECT`).
    ExtendedMethods,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http2 => "http2",
            Self::ForceClose => "force-close",
            Self::ExtendedMethods => "extended-methods",
        })
    }
}

/// Turns the error that escaped the chain into a response.
///
/// Called at most once per request, after the outermost chain element has
/// returned `Err`. It should leave a committed response alone.
pub type ErrorHandler = Arc<dyn Fn(&mut Context, Error) + Send + Sync>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<HashMap<String, Vec<String>>>,
}

/// Answers `{"error": "<message>"}` with [`Error::status`], adding `fields`
/// for validation failures. Server errors are logged at `error`, the rest at
/// `debug`.
pub fn default_error_handler(ctx: &mut Context, err: Error) {
    let status = err.status();
    if status.is_server_error() {
        error!(method = %ctx.method(), path = %ctx.path(), %status, error = %err, "request failed");
    } else {
        debug!(method = %ctx.method(), path = %ctx.path(), %status, error = %err, "request rejected");
    }

    if ctx.is_committed() {
        return;
    }
    let body = ErrorBody { error: err.to_string(), fields: err.field_errors() };
    if ctx.json(status, &body).is_err() {
        ctx.status(status);
    }
}

/// A serving backend.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use switchyard::{Engine, EngineConfig, HyperEngine, Router};
///
/// # async fn run() -> switchyard::Result<()> {
/// let engine = Arc::new(HyperEngine::new(EngineConfig::default(), Router::new()));
/// let serving = tokio::spawn({
///     let engine = Arc::clone(&engine);
///     async move { engine.start().await }
/// });
///
/// engine.stop(Duration::from_secs(5)).await?;
/// # let _ = serving.await;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short backend name, e.g. `"hyper"`.
    fn name(&self) -> &'static str;

    /// The root router. Register routes before [`start`](Engine::start).
    fn router(&self) -> &Router;

    /// Appends middleware that runs first for every request, matched or not.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] once the route table has been frozen by `start`.
    fn use_middleware(&self, middleware: BoxedHandler) -> Result<()>;

    /// Replaces the [`default_error_handler`]. Takes effect at the next start.
    fn set_error_handler(&self, handler: ErrorHandler);

    fn supports(&self, capability: Capability) -> bool;

    /// `Ok(())` when [`supports`](Engine::supports) holds, otherwise
    /// [`Error::AdapterLimitation`].
    fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(Error::AdapterLimitation { adapter: self.name(), capability })
        }
    }

    fn is_running(&self) -> bool;

    /// The bound address while running. Useful with port `0`.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Binds and serves until [`stop`](Engine::stop) is called.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] if the engine is not stopped, [`Error::Config`]
    /// for an unusable route table and [`Error::Io`] when binding fails.
    async fn start(&self) -> Result<()>;

    /// Stops accepting connections and drains in-flight ones within `grace`.
    /// Returns `Ok(())` immediately when already stopped.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] when connections had to be force-closed, or
    /// [`Error::AdapterLimitation`] when the backend had to leave them open.
    async fn stop(&self, grace: Duration) -> Result<()>;
}

/// State every adapter shares: configuration, routes, middleware, error
/// handler and lifecycle.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) router: Router,
    pub(crate) lifecycle: Lifecycle,
    middleware: Mutex<Vec<BoxedHandler>>,
    error_handler: Mutex<ErrorHandler>,
}

impl EngineCore {
    pub(crate) fn new(adapter: &'static str, config: EngineConfig, router: Router) -> Self {
        let lifecycle = Lifecycle::new(adapter, config.shutdown_grace());
        let on_error: ErrorHandler = Arc::new(default_error_handler);
        Self { config, router, lifecycle, middleware: Mutex::new(Vec::new()), error_handler: Mutex::new(on_error) }
    }

    pub(crate) fn use_middleware(&self, middleware: BoxedHandler) -> Result<()> {
        if self.router.is_frozen() {
            return Err(Error::Config("route table frozen, middleware must be added before start".into()));
        }
        self.middleware.lock().unwrap_or_else(PoisonError::into_inner).push(middleware);
        Ok(())
    }

    pub(crate) fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Freezes the routes and snapshots everything a serving run needs.
    pub(crate) fn dispatcher(&self) -> Result<Dispatcher> {
        let middleware = self.middleware.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let table = self.router.freeze(&middleware)?;
        let on_error = Arc::clone(&self.error_handler.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(Dispatcher { table, on_error, max_body: self.config.max_body_bytes })
    }
}

/// Runs requests through a frozen route table. One per serving run.
pub(crate) struct Dispatcher {
    table: RouteTable,
    on_error: ErrorHandler,
    max_body: usize,
}

impl Dispatcher {
    pub(crate) fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Builds the context, drives the chain, applies the error handler and
    /// converts the result for the backend.
    pub(crate) async fn serve<B, N>(
        &self,
        matched: Matched,
        parts: Parts,
        body: B,
        peer: Option<SocketAddr>,
        native: N,
    ) -> http::Response<ResponseBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
        N: Any + Send + Sync,
    {
        let head = RequestHead::new(parts, matched.params, matched.full_path, peer);
        let mut ctx = Context::new(matched.chain, head, RequestBody::new(body, self.max_body));
        ctx.set_native(native);

        if let Err(err) = ctx.next().await {
            self.handle_error(&mut ctx, err);
        }
        ctx.into_response().into_http()
    }

    fn handle_error(&self, ctx: &mut Context, err: Error) {
        let handled = catch_unwind(AssertUnwindSafe(|| (self.on_error)(ctx, err)));
        if let Err(payload) = handled {
            let err = Error::from_panic(payload);
            error!(path = %ctx.path(), error = %err, "error handler panicked");
            if !ctx.is_committed() {
                ctx.status(err.status());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    use super::*;
    use crate::handler::handler_fn;
    use crate::response::collect;
    use validator::Validate;

    fn core(router: Router) -> EngineCore {
        EngineCore::new("test", EngineConfig::default(), router)
    }

    async fn call(dispatcher: &Dispatcher, method: http::Method, path: &str) -> (StatusCode, serde_json::Value) {
        let (parts, body) = http::Request::builder().method(method).uri(path).body(Full::new(Bytes::new())).unwrap().into_parts();
        let matched = dispatcher.table().lookup(&parts.method, parts.uri.path());
        let res = dispatcher.serve(matched, parts, body, None, ()).await;
        let status = res.status();
        let body = collect(res.into_body()).await;
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn capability_names() {
        assert_eq!(Capability::Http2.to_string(), "http2");
        assert_eq!(Capability::ExtendedMethods.to_string(), "extended-methods");
    }

    #[tokio::test]
    async fn errors_become_json_responses() {
        #[derive(Debug, serde::Deserialize, Validate)]
        struct Input {
            #[validate(range(min = 1))]
            n: u32,
        }

        let router = Router::new();
        router.get("/boom", handler_fn(|_ctx| Box::pin(async { Err(Error::handler("boom")) })));
        router.get("/invalid", handler_fn(|ctx| Box::pin(async move { ctx.bind_query::<Input>().map(drop) })));
        router.get("/committed", handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text(StatusCode::ACCEPTED, "partial");
                Err(Error::handler("late failure"))
            })
        }));
        let dispatcher = core(router).dispatcher().unwrap();

        let (status, body) = call(&dispatcher, http::Method::GET, "/boom").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({ "error": "boom" }));

        let (status, body) = call(&dispatcher, http::Method::GET, "/invalid?n=0").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"]["n"], serde_json::json!(["range"]));

        let (status, _) = call(&dispatcher, http::Method::GET, "/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&dispatcher, http::Method::GET, "/committed").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn uncommitted_success_is_empty_200() {
        let router = Router::new();
        router.get("/quiet", handler_fn(|_ctx| Box::pin(async { Ok(()) })));
        let dispatcher = core(router).dispatcher().unwrap();

        let (status, body) = call(&dispatcher, http::Method::GET, "/quiet").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn custom_error_handler_and_panicking_handler() {
        let router = Router::new();
        router.get("/boom", handler_fn(|_ctx| Box::pin(async { Err(Error::handler("boom")) })));
        let core = core(router);

        core.set_error_handler(Arc::new(|ctx: &mut Context, _err: Error| ctx.status(StatusCode::IM_A_TEAPOT)));
        let dispatcher = core.dispatcher().unwrap();
        assert_eq!(call(&dispatcher, http::Method::GET, "/boom").await.0, StatusCode::IM_A_TEAPOT);

        fn explode(_ctx: &mut Context, err: Error) {
            panic!("handler for {err} failed");
        }
        core.set_error_handler(Arc::new(explode));
        let dispatcher = core.dispatcher().unwrap();
        assert_eq!(call(&dispatcher, http::Method::GET, "/boom").await.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn middleware_after_freeze_is_rejected() {
        let core = core(Router::new());
        let noop = crate::handler::boxed(handler_fn(|ctx| Box::pin(async move { ctx.next().await })));

        assert!(core.use_middleware(Arc::clone(&noop)).is_ok());
        core.dispatcher().unwrap();
        assert!(matches!(core.use_middleware(noop), Err(Error::Config(_))));
    }
}
