//! Engine backed by a hand-driven hyper accept loop.
//!
//! Each accepted connection runs in its own task on a `JoinSet`. The
//! `hyper_util` auto builder serves HTTP/1.1 and HTTP/2 on the same port.
//! On `stop`, the accept loop exits, every connection is asked to shut down
//! gracefully, and whatever is still running when the grace period ends is
//! aborted.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::{Capability, Dispatcher, Engine, EngineCore, ErrorHandler};
use crate::error::Result;
use crate::handler::BoxedHandler;
use crate::lifecycle::Drain;
use crate::response::ResponseBody;
use crate::router::Router;

const NAME: &str = "hyper";

/// Backend-native view of a request served by [`HyperEngine`].
#[derive(Clone, Debug)]
pub struct HyperNative {
    pub peer: SocketAddr,
    pub version: http::Version,
}

pub struct HyperEngine {
    core: EngineCore,
}

impl HyperEngine {
    pub fn new(config: EngineConfig, router: Router) -> Self {
        Self { core: EngineCore::new(NAME, config, router) }
    }
}

#[async_trait]
impl Engine for HyperEngine {
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
            Capability::Http2 | Capability::ForceClose | Capability::ExtendedMethods => true,
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
        let listener = TcpListener::bind(self.core.config.addr).await?;
        serving.running(listener.local_addr()?);

        let token = serving.token();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                // Check cancellation first so a stop immediately ends
                // accepting, even if more connections are queued.
                biased;

                () = token.cancelled() => {
                    info!(adapter = NAME, in_flight = tasks.len(), "draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(adapter = NAME, "accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(stream, peer, Arc::clone(&dispatcher), token.clone()));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        serving.finish(drain(&mut tasks, self.core.lifecycle.grace()).await);
        Ok(())
    }

    async fn stop(&self, grace: Duration) -> Result<()> {
        self.core.lifecycle.stop(grace).await
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>, token: CancellationToken) {
    // `service_fn` is called once per request on the connection, not once
    // per connection.
    let svc = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { Ok::<_, Infallible>(dispatch(&dispatcher, req, peer).await) }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = token.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(adapter = NAME, %peer, "connection error: {e}");
    }
}

async fn dispatch(dispatcher: &Dispatcher, req: http::Request<Incoming>, peer: SocketAddr) -> http::Response<ResponseBody> {
    let (parts, body) = req.into_parts();
    let matched = dispatcher.table().lookup(&parts.method, parts.uri.path());
    let native = HyperNative { peer, version: parts.version };
    dispatcher.serve(matched, parts, body, Some(peer), native).await
}

/// Waits up to `grace` for every connection task, then aborts the rest.
async fn drain(tasks: &mut JoinSet<()>, grace: Duration) -> Drain {
    let all_done = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(grace, all_done).await.is_ok() {
        return Drain::Clean;
    }

    let connections = tasks.len();
    warn!(adapter = NAME, connections, ?grace, "grace period elapsed, closing remaining connections");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    Drain::Forced { connections }
}
