use std::collections::BTreeMap;

use async_trait::async_trait;
use pipeline::{Policy, PolicyError, StreamBlock, StreamingContext};

use crate::PolicyBuildError;

/// Buffers each content block and applies substring replacements before
/// releasing it as a single chunk.
///
/// Deltas are suppressed while a block is open so a replacement can span
/// chunk boundaries; the client sees the block only when it is complete.
/// Tool calls pass through whole, also buffered.
pub struct StringReplacementPolicy {
    replacements: BTreeMap<String, String>,
}

impl StringReplacementPolicy {
    /// Builds the policy from its options map.
    ///
    /// Expects a `replacements` object of `from → to` string pairs.
    pub fn from_options(options: &BTreeMap<String, serde_json::Value>) -> Result<Self, PolicyBuildError> {
        let mut replacements = BTreeMap::new();

        if let Some(value) = options.get("replacements") {
            let map = value.as_object().ok_or(PolicyBuildError::InvalidOption {
                policy: "string_replacement",
                option: "replacements",
                message: "expected an object of from/to string pairs".to_string(),
            })?;

            for (from, to) in map {
                let to = to.as_str().ok_or(PolicyBuildError::InvalidOption {
                    policy: "string_replacement",
                    option: "replacements",
                    message: format!("replacement for '{from}' is not a string"),
                })?;
                replacements.insert(from.clone(), to.to_string());
            }
        }

        Ok(Self { replacements })
    }

    fn apply(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (from, to) in &self.replacements {
            result = result.replace(from, to);
        }
        result
    }
}

#[async_trait]
impl Policy for StringReplacementPolicy {
    async fn on_content_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(block) = ctx.just_completed().and_then(StreamBlock::as_content) else {
            return Ok(());
        };

        let replaced = self.apply(&block.content);
        if replaced.is_empty() {
            return Ok(());
        }

        if replaced != block.content {
            ctx.emit(
                "string_replacement.applied",
                "Replaced content in completed block",
                observability::Severity::Info,
                serde_json::Map::new(),
            );
        }

        let model = ctx.model().to_string();
        let chunk = llm::messages::openai::ChatCompletionChunk::content("", model, replaced);
        ctx.push(chunk).await
    }

    async fn on_tool_call_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(block) = ctx.just_completed().and_then(StreamBlock::as_tool_call).cloned() else {
            return Ok(());
        };

        let model = ctx.model().to_string();
        let chunk = llm::messages::openai::ChatCompletionChunk::tool_call(
            "",
            model,
            block.index,
            block.id,
            block.name,
            block.arguments,
        );
        ctx.push(chunk).await
    }

    async fn on_finish_reason(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(chunk) = ctx.chunk().cloned() else {
            return Ok(());
        };
        ctx.push(chunk).await
    }
}
