//! Anthropic Messages API wire format.
//!
//! Differs from the canonical OpenAI schema in several ways the converter
//! has to bridge: the system prompt is a separate field, message content is
//! an array of typed blocks, tool interactions use tool_use/tool_result
//! blocks, and streaming uses explicit lifecycle events with block indices
//! instead of bare deltas.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the Anthropic Messages endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// The model to use for the completion.
    pub model: String,

    /// Conversation messages, alternating user and assistant roles.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate. Required by the API.
    pub max_tokens: u32,

    /// System prompt, kept separate from the messages array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Controls randomness. Range 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Only sample from the top K tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that stop generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Provider-specific fields the proxy does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The message author.
    pub role: Role,
    /// String content or an array of typed blocks.
    pub content: MessageContent,
}

/// Message author role. Anthropic has no system or tool roles; those are
/// expressed through the system field and tool_result blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// Message content: plain string or typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Typed content blocks.
    Blocks(Vec<ContentBlock>),
}

/// A typed content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content.
    Image {
        /// The image source descriptor, passed through untyped.
        source: Value,
    },

    /// Tool invocation requested by the assistant.
    ToolUse {
        /// Unique identifier for this tool use.
        id: String,
        /// Name of the tool.
        name: String,
        /// Parsed input arguments.
        input: Value,
    },

    /// Result of a tool execution, sent back by the user.
    ToolResult {
        /// The tool_use id this result answers.
        tool_use_id: String,
        /// Result payload: a string or nested content blocks.
        #[serde(default)]
        content: Value,
        /// Whether the execution failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name.
    pub name: String,

    /// What the tool does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the tool input.
    pub input_schema: Value,
}

/// Non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Unique identifier for this message.
    pub id: String,

    /// Always "message".
    pub r#type: String,

    /// Always assistant.
    pub role: Role,

    /// Response content blocks.
    pub content: Vec<ContentBlock>,

    /// Model that generated the response.
    pub model: String,

    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,

    /// The stop sequence that was matched, if any.
    pub stop_sequence: Option<String>,

    /// Token usage statistics.
    pub usage: UsageInfo,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant's turn.
    EndTurn,
    /// Hit the max_tokens limit.
    MaxTokens,
    /// A stop sequence was matched.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// Any other reason, preserved verbatim for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Token usage statistics in Anthropic format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    /// Tokens in the input prompt.
    ///
    /// Omitted in streaming message_delta events.
    #[serde(default)]
    pub input_tokens: u32,

    /// Tokens generated in the response.
    pub output_tokens: u32,
}

/// Streaming event for Anthropic SSE responses.
///
/// Event flow for a typical streaming response:
/// 1. `message_start` - initial metadata with empty content
/// 2. `content_block_start` - beginning of a content block
/// 3. `content_block_delta` - incremental updates (many)
/// 4. `content_block_stop` - end of the current block
/// 5. `message_delta` - stop reason and final usage
/// 6. `message_stop` - end of the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Initial message metadata.
    MessageStart {
        /// Synthesized message header.
        message: StreamMessageStart,
    },

    /// A new content block begins at the given index.
    ContentBlockStart {
        /// Sequential block index.
        index: u32,
        /// The block header: an empty text block or a tool_use header
        /// with id and name and empty input.
        content_block: ContentBlock,
    },

    /// Incremental update to the block at the given index.
    ContentBlockDelta {
        /// Block index the delta applies to.
        index: u32,
        /// The delta payload.
        delta: ContentDelta,
    },

    /// The block at the given index is complete.
    ContentBlockStop {
        /// Block index.
        index: u32,
    },

    /// Stop reason and cumulative usage.
    MessageDelta {
        /// Stop reason delta.
        delta: MessageDeltaData,
        /// Cumulative usage.
        usage: UsageInfo,
    },

    /// End of the stream.
    MessageStop,

    /// Connection keepalive; carries no data.
    Ping,

    /// Terminal error event.
    Error {
        /// The error that occurred.
        error: ErrorDetails,
    },
}

impl StreamEvent {
    /// The SSE event name, matching the tagged `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Message header carried by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Unique message id.
    pub id: String,
    /// Always "message".
    pub r#type: String,
    /// Always assistant.
    pub role: Role,
    /// Empty at stream start; populated through block events.
    pub content: Vec<ContentBlock>,
    /// The model being used.
    pub model: String,
    /// Initial usage statistics.
    pub usage: UsageInfo,
}

/// Delta payload for a content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text fragment to append.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Partial JSON for tool input.
    InputJsonDelta {
        /// JSON fragment to append to the accumulated input string.
        partial_json: String,
    },
}

/// Stop information carried by `message_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaData {
    /// Why generation stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// The stop sequence that was matched, if any.
    pub stop_sequence: Option<String>,
}

/// Error response body in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always "error".
    pub r#type: String,
    /// Error details.
    pub error: ErrorDetails,
}

/// Error details in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error type.
    pub r#type: String,
    /// Human-readable error message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_request_with_typed_blocks() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "system": "Be terse.",
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "I'll check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                     "input": {"location": "NYC"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "72F"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(request.messages.len(), 3);

        let MessageContent::Blocks(blocks) = &request.messages[1].content else {
            unreachable!("expected typed blocks");
        };
        let ContentBlock::ToolUse { id, name, input } = &blocks[1] else {
            unreachable!("expected tool_use block");
        };
        assert_eq!(id, "toolu_1");
        assert_eq!(name, "get_weather");
        assert_eq!(input["location"], "NYC");
    }

    #[test]
    fn serialize_stream_events() {
        let start = StreamEvent::ContentBlockStart {
            index: 1,
            content_block: ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({}),
            },
        };

        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["type"], "content_block_start");
        assert_eq!(json["index"], 1);
        assert_eq!(json["content_block"]["type"], "tool_use");

        let delta = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "Hello".to_string(),
            },
        };

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["delta"]["type"], "text_delta");
        assert_eq!(json["delta"]["text"], "Hello");

        let stop = StreamEvent::MessageStop;
        assert_eq!(serde_json::to_value(&stop).unwrap(), json!({"type": "message_stop"}));
    }

    #[test]
    fn unknown_stop_reason_passes_through() {
        let reason: StopReason = serde_json::from_value(json!("pause_turn")).unwrap();
        assert_eq!(reason, StopReason::Other("pause_turn".to_string()));
    }

    #[test]
    fn usage_tolerates_missing_input_tokens() {
        let usage: UsageInfo = serde_json::from_value(json!({"output_tokens": 17})).unwrap();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 17);
    }
}
