use async_trait::async_trait;
use pipeline::{Policy, PolicyError, StreamingContext};

/// Uppercases every content delta in place; everything else passes
/// through untouched.
///
/// Transforms progressively, delta by delta, so the client still sees a
/// live stream.
pub struct UppercasePolicy;

#[async_trait]
impl Policy for UppercasePolicy {
    async fn on_chunk_received(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(chunk) = ctx.chunk() else {
            return Ok(());
        };

        // Content chunks are pushed transformed from on_content_delta.
        if chunk.content_delta().is_some() {
            return Ok(());
        }

        let chunk = chunk.clone();
        ctx.push(chunk).await
    }

    async fn on_content_delta(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(mut chunk) = ctx.chunk().cloned() else {
            return Ok(());
        };

        if let Some(choice) = chunk.choices.first_mut()
            && let Some(text) = choice.delta.content.take()
        {
            choice.delta.content = Some(text.to_uppercase());
        }

        ctx.push(chunk).await
    }
}
