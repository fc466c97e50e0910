//! # switchyard
//!
//! One request contract, several HTTP backends.
//!
//! Handlers and middleware are written once against [`Context`] and run
//! unchanged on any [`Engine`]. The engine owns the socket and the connection
//! lifecycle; the router, the middleware chain, binding, rendering and error
//! handling behave the same everywhere.
//!
//! ## The contract
//!
//! - **One chain per request.** Engine middleware, then group middleware from
//!   the outermost group inwards, then route middleware, then the handler.
//!   Each element calls [`Context::next`] to run the rest.
//! - **Errors flow up.** A handler returns `Err`, middleware may map or
//!   recover it, and whatever reaches the top goes to the engine's
//!   [`ErrorHandler`], which renders JSON unless something was already written.
//! - **First write wins.** A response is committed once; later writes are
//!   ignored with a warning.
//! - **Backends differ only at the edges.** What one engine cannot do is
//!   reported through [`Engine::supports`] and [`Error::AdapterLimitation`],
//!   never silently emulated.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use switchyard::{handler_fn, Engine, EngineConfig, HyperEngine, Router, StatusCode};
//! use validator::Validate;
//!
//! #[derive(Deserialize, Validate)]
//! struct NewUser {
//!     #[validate(length(min = 1))]
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> switchyard::Result<()> {
//!     let router = Router::new();
//!     let api = router.group("/api");
//!
//!     api.get("/users/:id", handler_fn(|ctx| Box::pin(async move {
//!         let id = ctx.param("id").to_owned();
//!         ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//!     })));
//!
//!     api.post("/users", handler_fn(|ctx| Box::pin(async move {
//!         let user: NewUser = ctx.bind_json().await?;
//!         ctx.json(StatusCode::CREATED, &serde_json::json!({ "name": user.name }))
//!     })));
//!
//!     let config = EngineConfig::from_file("switchyard.toml")?.with_env_overrides()?;
//!     let grace = config.shutdown_grace();
//!     let engine = HyperEngine::new(config, router);
//!     switchyard::signal::run_until_signal(&engine, grace).await
//! }
//! ```

mod adapter;
mod bind;
mod body;
mod config;
mod context;
mod engine;
mod error;
mod form;
mod handler;
mod lifecycle;
mod method;
mod request;
mod response;
mod router;
mod state;

pub mod health;
pub mod middleware;
pub mod signal;

pub use adapter::{AxumEngine, AxumNative, HyperEngine, HyperNative};
pub use config::EngineConfig;
pub use context::Context;
pub use engine::{Capability, Engine, ErrorHandler, default_error_handler};
pub use error::{BoxError, Error, Result};
pub use form::{FormFile, MultipartForm};
pub use handler::{BoxFuture, BoxedHandler, Handler, boxed, handler_fn};
pub use method::Method;
pub use request::Params;
pub use response::{Response, ResponseBody};
pub use router::Router;
pub use state::StateStore;

pub use async_trait::async_trait;
pub use cookie;
pub use http::StatusCode;
