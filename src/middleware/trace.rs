use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::context::Context;
use crate::error::Result;
use crate::handler::Handler;

/// Logs one event per request once the rest of the chain has returned.
///
/// The logged status is the one the client will see: the committed status,
/// or for an error that nothing committed, the status the error maps to.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

#[async_trait]
impl Handler for Trace {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        let start = Instant::now();
        let result = ctx.next().await;
        let elapsed = start.elapsed();

        let status = match &result {
            Err(err) if !ctx.is_committed() => err.status(),
            _ => ctx.response().status(),
        };
        // Failures themselves are logged by the error handler.
        info!(
            method = %ctx.method(),
            path = %ctx.path(),
            route = ctx.full_path(),
            status = status.as_u16(),
            ?elapsed,
            aborted = ctx.is_aborted(),
            "request completed"
        );
        result
    }
}
