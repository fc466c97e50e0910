//! Engine backed by an `axum::Router` and `axum::serve`.
//!
//! Routes are registered natively: one `MethodRouter` per pattern, each
//! method mapped to a handler that runs the route's resolved chain. Unmatched
//! paths and methods go through an axum fallback that runs the engine-wide
//! middleware and the not-found chain, exactly like the hyper backend.
//!
//! Limitations, reported through [`Engine::supports`]:
//! - no HTTP/2 (`axum` is built with its default `http1` feature only)
//! - no extended methods (`axum::routing::MethodFilter` has no WebDAV verbs)
//! - no force-close: `axum::serve` drains gracefully but cannot cut the
//!   connections that outlive the grace period, so `stop` reports
//!   [`Error::AdapterLimitation`] for them and leaves them running

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::routing::{MethodFilter, MethodRouter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineConfig;
use crate::engine::{Capability, Dispatcher, Engine, EngineCore, ErrorHandler};
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, BoxedHandler};
use crate::lifecycle::{Drain, Lifecycle};
use crate::method::Method;
use crate::request::Params;
use crate::router::{Chain, Matched, PatternMatcher, Router};

const NAME: &str = "axum";

/// Backend-native view of a request served by [`AxumEngine`].
#[derive(Clone, Debug)]
pub struct AxumNative {
    pub peer: Option<SocketAddr>,
    /// The axum route pattern that matched, `None` for fallbacks.
    pub matched_path: Option<String>,
}

pub struct AxumEngine {
    core: EngineCore,
}

impl AxumEngine {
    pub fn new(config: EngineConfig, router: Router) -> Self {
        Self { core: EngineCore::new(NAME, config, router) }
    }
}

#[async_trait]
impl Engine for AxumEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn router(&self) -> &Router {
        &self.core.router
    }

    fn use_middleware(&self, middleware: BoxedHandler) -> Result<()> {
        self.core.use_middleware(middleware)
    }

    fn set_error_handler(&self, handler: ErrorHandler) {
        self.core.set_error_handler(handler);
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Http2 | Capability::ForceClose | Capability::ExtendedMethods => false,
        }
    }

    fn is_running(&self) -> bool {
        self.core.lifecycle.is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.lifecycle.local_addr()
    }

    async fn start(&self) -> Result<()> {
        let serving = self.core.lifecycle.begin()?;
        let dispatcher = Arc::new(self.core.dispatcher()?);
        let app = build_app(&dispatcher)?;
        let listener = TcpListener::bind(self.core.config.addr).await?;
        serving.running(listener.local_addr()?);

        let token = serving.token();
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        let drain = tokio::select! {
            result = &mut server => {
                result?;
                Drain::Clean
            }
            () = grace_elapsed(&token, &self.core.lifecycle) => {
                warn!(adapter = NAME, "grace period elapsed, leaving open connections to finish on their own");
                Drain::Abandoned
            }
        };
        serving.finish(drain);
        Ok(())
    }

    async fn stop(&self, grace: Duration) -> Result<()> {
        self.core.lifecycle.stop(grace).await
    }
}

async fn grace_elapsed(token: &CancellationToken, lifecycle: &Lifecycle) {
    token.cancelled().await;
    tokio::time::sleep(lifecycle.grace()).await;
}

/// Translates the frozen route table into an `axum::Router`.
fn build_app(dispatcher: &Arc<Dispatcher>) -> Result<axum::Router> {
    let mut patterns: Vec<&str> = Vec::new();
    let mut by_pattern: HashMap<&str, MethodRouter> = HashMap::new();

    for route in dispatcher.table().routes() {
        let filter = method_filter(route.method)
            .ok_or(Error::AdapterLimitation { adapter: NAME, capability: Capability::ExtendedMethods })?;
        let matcher = PatternMatcher::new(&route.pattern)?;
        let handler = route_handler(Arc::clone(dispatcher), Arc::clone(&route.chain), route.pattern.clone(), matcher);

        let pattern = route.pattern.as_str();
        let method_router = match by_pattern.remove(pattern) {
            Some(existing) => existing,
            None => {
                patterns.push(pattern);
                MethodRouter::new().fallback(not_found_handler(Arc::clone(dispatcher)))
            }
        };
        by_pattern.insert(pattern, method_router.on(filter, handler));
    }

    let mut app = axum::Router::new();
    for pattern in patterns {
        let Some(method_router) = by_pattern.remove(pattern) else { continue };
        // axum panics on patterns it cannot route; surface that as a config error
        app = catch_unwind(AssertUnwindSafe(|| app.route(pattern, method_router)))
            .map_err(|_| Error::Config(format!("axum rejected route `{pattern}`")))?;
    }
    Ok(app.fallback(not_found_handler(Arc::clone(dispatcher))))
}

fn method_filter(method: Method) -> Option<MethodFilter> {
    if !method.is_standard() {
        return None;
    }
    let wire = http::Method::from_bytes(method.as_str().as_bytes()).ok()?;
    MethodFilter::try_from(wire).ok()
}

type Peer = Option<ConnectInfo<SocketAddr>>;

/// Runs `chain` for requests axum routed to `pattern`.
///
/// Captures are re-read from the URI with the route table's own matcher, so
/// they decode the same way as on every other backend.
fn route_handler(
    dispatcher: Arc<Dispatcher>,
    chain: Chain,
    pattern: String,
    matcher: PatternMatcher,
) -> impl Fn(Peer, Request) -> BoxFuture<'static, http::Response<Body>> + Clone + Send + Sync + 'static {
    let matcher = Arc::new(matcher);
    move |peer, req| {
        let dispatcher = Arc::clone(&dispatcher);
        let matched = Matched {
            chain: Arc::clone(&chain),
            params: matcher.params(req.uri().path()),
            full_path: pattern.clone(),
        };
        Box::pin(async move { serve(&dispatcher, matched, peer, req).await })
    }
}

fn not_found_handler(
    dispatcher: Arc<Dispatcher>,
) -> impl Fn(Peer, Request) -> BoxFuture<'static, http::Response<Body>> + Clone + Send + Sync + 'static {
    move |peer, req| {
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move {
            let matched =
                Matched { chain: dispatcher.table().not_found(), params: Params::default(), full_path: String::new() };
            serve(&dispatcher, matched, peer, req).await
        })
    }
}

async fn serve(dispatcher: &Dispatcher, matched: Matched, peer: Peer, req: Request) -> http::Response<Body> {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let native = AxumNative { peer, matched_path: (!matched.full_path.is_empty()).then(|| matched.full_path.clone()) };
    let (parts, body) = req.into_parts();
    dispatcher.serve(matched, parts, body, peer, native).await.map(Body::new)
}
