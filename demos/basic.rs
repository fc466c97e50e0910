//! Minimal switchyard example: CRUD-style JSON endpoints and health checks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!   RUST_LOG=info SWITCHYARD_ENGINE=axum cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/users/42
//!   curl http://localhost:3000/healthz

use serde::Deserialize;
use serde_json::json;
use switchyard::middleware::{RequestId, Trace};
use switchyard::{
    AxumEngine, BoxFuture, Context, Engine, EngineConfig, HyperEngine, Result, Router, StatusCode, boxed, health,
    signal,
};
use tracing_subscriber::EnvFilter;
use validator::Validate;

#[derive(Deserialize, Validate)]
struct CreateUser {
    #[validate(length(min = 1, max = 64))]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let router = Router::new();
    router.get("/healthz", health::liveness).get("/readyz", health::readiness);

    let users = router.group("/users");
    users
        .get("/:id", get_user)
        .post("", create_user)
        .delete("/:id", delete_user);

    let config = EngineConfig::default().with_env_overrides()?;
    let grace = config.shutdown_grace();
    let engine: Box<dyn Engine> = match std::env::var("SWITCHYARD_ENGINE").as_deref() {
        Ok("axum") => Box::new(AxumEngine::new(config, router)),
        _ => Box::new(HyperEngine::new(config, router)),
    };
    engine.use_middleware(boxed(RequestId::default()))?;
    engine.use_middleware(boxed(Trace))?;

    signal::run_until_signal(engine.as_ref(), grace).await
}

// GET /users/:id
fn get_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let id = ctx.param("id").to_owned();
        ctx.json(StatusCode::OK, &json!({ "id": id, "name": "alice" }))
    })
}

// POST /users
//
// Malformed JSON answers 400, a failed constraint 422 with the field names.
fn create_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let input: CreateUser = ctx.bind_json().await?;
        ctx.set_header("location", "/users/99")?;
        ctx.json(StatusCode::CREATED, &json!({ "id": "99", "name": input.name }))
    })
}

// DELETE /users/:id → 204 No Content
fn delete_user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.no_content(StatusCode::NO_CONTENT);
        Ok(())
    })
}
