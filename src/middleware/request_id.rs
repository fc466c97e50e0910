use async_trait::async_trait;
use uuid::Uuid;

use crate::context::Context;
use crate::error::Result;
use crate::handler::Handler;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Propagates an inbound `X-Request-Id`, or generates a UUID v4 when the
/// request has none, and sets it on the response before the chain runs.
///
/// The id is stored in the request state under [`RequestId::STATE_KEY`] as a
/// `String`.
#[derive(Clone, Copy, Debug)]
pub struct RequestId {
    /// Reuse a well-formed inbound id instead of always generating one.
    pub trust_inbound: bool,
}

impl RequestId {
    pub const STATE_KEY: &'static str = "request_id";
}

impl Default for RequestId {
    fn default() -> Self {
        Self { trust_inbound: true }
    }
}

#[async_trait]
impl Handler for RequestId {
    async fn handle(&self, ctx: &mut Context) -> Result<()> {
        let inbound = ctx
            .header(REQUEST_ID_HEADER)
            .filter(|id| self.trust_inbound && is_well_formed(id))
            .map(str::to_owned);
        let id = inbound.unwrap_or_else(|| Uuid::new_v4().to_string());

        ctx.set_header(REQUEST_ID_HEADER, &id)?;
        ctx.set(Self::STATE_KEY, id);
        ctx.next().await
    }
}

fn is_well_formed(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.bytes().all(|b| b.is_ascii_graphic())
}
