use async_trait::async_trait;
use pipeline::{Policy, PolicyError, StreamingContext};

/// Forwards every chunk verbatim.
///
/// The reference policy: its egress stream is chunk-for-chunk equal to
/// the ingress stream.
pub struct PassthroughPolicy;

#[async_trait]
impl Policy for PassthroughPolicy {
    async fn on_chunk_received(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(chunk) = ctx.chunk().cloned() else {
            return Ok(());
        };
        ctx.push(chunk).await
    }
}
