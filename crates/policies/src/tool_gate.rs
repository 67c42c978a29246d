use std::collections::BTreeSet;

use async_trait::async_trait;
use observability::Severity;
use pipeline::{Policy, PolicyError, StreamBlock, StreamingContext};
use serde_json::json;

use crate::PolicyBuildError;

/// Gates tool calls by name.
///
/// Content streams through progressively; tool calls are buffered by the
/// assembler and inspected whole. A blocked tool call is dropped and,
/// when configured, replaced with a text notice. Allowed tool calls are
/// re-emitted as one complete chunk.
pub struct ToolCallGatePolicy {
    blocked_tools: BTreeSet<String>,
    replacement_message: Option<String>,
}

impl ToolCallGatePolicy {
    /// Builds the policy from its options map.
    ///
    /// Expects `blocked_tools` as a list of names, and optionally
    /// `replacement_message` as the text emitted in place of a blocked
    /// call.
    pub fn from_options(
        options: &std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, PolicyBuildError> {
        let mut blocked_tools = BTreeSet::new();

        if let Some(value) = options.get("blocked_tools") {
            let list = value.as_array().ok_or(PolicyBuildError::InvalidOption {
                policy: "tool_call_gate",
                option: "blocked_tools",
                message: "expected a list of tool names".to_string(),
            })?;

            for item in list {
                let name = item.as_str().ok_or(PolicyBuildError::InvalidOption {
                    policy: "tool_call_gate",
                    option: "blocked_tools",
                    message: "tool names must be strings".to_string(),
                })?;
                blocked_tools.insert(name.to_string());
            }
        }

        let replacement_message = match options.get("replacement_message") {
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or(PolicyBuildError::InvalidOption {
                        policy: "tool_call_gate",
                        option: "replacement_message",
                        message: "expected a string".to_string(),
                    })?
                    .to_string(),
            ),
            None => None,
        };

        Ok(Self {
            blocked_tools,
            replacement_message,
        })
    }
}

#[async_trait]
impl Policy for ToolCallGatePolicy {
    async fn on_content_delta(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(chunk) = ctx.chunk().cloned() else {
            return Ok(());
        };
        ctx.push(chunk).await
    }

    async fn on_tool_call_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        let Some(block) = ctx.just_completed().and_then(StreamBlock::as_tool_call).cloned() else {
            return Ok(());
        };

        if self.blocked_tools.contains(&block.name) {
            log::warn!("blocking tool call '{}' ({})", block.name, block.id);

            let mut details = serde_json::Map::new();
            details.insert("tool_name".to_string(), json!(block.name));
            details.insert("tool_id".to_string(), json!(block.id));

            ctx.emit(
                "tool_gate.blocked",
                &format!("Blocked tool call: {}", block.name),
                Severity::Warning,
                details,
            );

            if let Some(message) = &self.replacement_message {
                let model = ctx.model().to_string();
                let chunk = llm::messages::openai::ChatCompletionChunk::content("", model, message.clone());
                return ctx.push(chunk).await;
            }

            return Ok(());
        }

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
