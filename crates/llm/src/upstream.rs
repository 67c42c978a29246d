//! Upstream LLM provider clients.
//!
//! An upstream receives the canonical request and yields the canonical
//! chunk stream, whatever protocol it speaks on the wire. The Anthropic
//! client normalizes typed SSE events back into OpenAI-style deltas so
//! the policy pipeline only ever sees one schema.

mod anthropic;
mod openai;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

pub use anthropic::AnthropicUpstream;
pub use openai::OpenAiUpstream;

use crate::error::{UpstreamError, UpstreamResult};
use crate::messages::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

/// A stream of canonical chunks from the upstream.
pub type ChatStream = Pin<Box<dyn Stream<Item = UpstreamResult<ChatCompletionChunk>> + Send>>;

/// An upstream LLM provider.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Dispatches a non-streaming completion request.
    async fn chat(&self, request: ChatCompletionRequest) -> UpstreamResult<ChatCompletionResponse>;

    /// Dispatches a streaming completion request.
    async fn chat_stream(&self, request: ChatCompletionRequest) -> UpstreamResult<ChatStream>;

    /// Provider name for logs and records.
    fn name(&self) -> &str;
}

/// Builds the configured upstream client.
pub fn from_config(config: &config::UpstreamConfig) -> UpstreamResult<Arc<dyn Upstream>> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| UpstreamError::AuthenticationFailed("no upstream API key configured".to_string()))?;

    Ok(match config.provider {
        config::UpstreamProvider::Openai => Arc::new(OpenAiUpstream::new(config.base_url.clone(), api_key)?),
        config::UpstreamProvider::Anthropic => Arc::new(AnthropicUpstream::new(config.base_url.clone(), api_key)?),
    })
}
