//! OpenAI chat completions wire format.
//!
//! This is also the canonical internal schema of the proxy: upstream
//! responses in any provider format are normalized into these types before
//! a policy observes them, and the client formatters translate back out.
//! Provider-specific request fields the proxy does not interpret are kept
//! in an untyped overflow map and passed through unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Controls randomness in the response. Range 0.0 to 2.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff. Range 0.0 to 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Sequences that stop generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Tool choice directive, passed through untyped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Provider-specific fields the proxy does not interpret.
    ///
    /// Forwarded to the upstream verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,

    /// Message content; absent for assistant messages that only carry
    /// tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For role=tool messages, the id of the tool call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A plain text message with the given role.
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Flattens the content to a single string, joining typed text parts.
    pub fn content_text(&self) -> Option<String> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text.clone()),
            Some(MessageContent::Parts(parts)) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect();

                if texts.is_empty() { None } else { Some(texts.join("")) }
            }
            None => None,
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
    /// Any other role, preserved for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

/// Message content: a plain string or typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Typed content parts (text, images).
    Parts(Vec<ContentPart>),
}

/// A typed content part within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text fragment.
    Text {
        /// The text content.
        text: String,
    },
    /// Image reference.
    ImageUrl {
        /// The image URL descriptor.
        image_url: ImageUrl,
    },
}

/// Image reference in a content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// HTTP(S) or data URL of the image.
    pub url: String,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Always "function" today.
    pub r#type: ToolType,
    /// The function specification.
    pub function: FunctionDefinition,
}

/// Tool kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// A callable function.
    Function,
}

/// Callable function specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name, unique among the offered tools.
    pub name: String,

    /// What the function does; guides the model's tool selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the accepted arguments.
    #[serde(default)]
    pub parameters: Value,
}

/// A completed tool call on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier correlating the call with its result.
    pub id: String,
    /// Tool kind discriminator.
    pub r#type: ToolType,
    /// The function invocation.
    pub function: FunctionCall,
}

/// Function invocation with serialized arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function being called.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique identifier for this completion.
    pub id: String,
    /// Object type marker.
    pub object: ObjectType,
    /// Unix timestamp of creation.
    pub created: u64,
    /// Model that generated the response.
    pub model: String,
    /// Response choices; index 0 is the primary response.
    pub choices: Vec<ChatChoice>,
    /// Token usage statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One response choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Index of this choice.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
}

/// Terminal state marker of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stopping point.
    Stop,
    /// Token limit reached; the response may be truncated.
    Length,
    /// Content was filtered for safety reasons.
    ContentFilter,
    /// The model requested tool calls.
    ToolCalls,
    /// Provider-specific reason, passed through verbatim.
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// Object type marker used in responses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObjectType {
    /// A complete chat completion.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// One chunk of a streaming completion.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// One unit of an incremental streaming response.
///
/// This is the only form the policy pipeline sees; wire-format adaptation
/// happens outside of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier, stable across all chunks of one response.
    pub id: String,
    /// Object type marker.
    pub object: ObjectType,
    /// Unix timestamp of creation.
    pub created: u64,
    /// Model generating the response.
    pub model: String,
    /// Incremental choice updates; usually a single entry at index 0.
    pub choices: Vec<ChatChoiceDelta>,
    /// Cumulative usage; present only on the final chunk when the
    /// provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    /// Index of the choice being updated.
    pub index: u32,
    /// The incremental payload.
    pub delta: ChatMessageDelta,
    /// Present on the final chunk of the choice.
    pub finish_reason: Option<FinishReason>,
}

/// The mutable payload of a chunk.
///
/// Carries a content fragment, one or more tool-call fragments, or
/// neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageDelta {
    /// Author role; present only in the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Text fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool-call fragments keyed by tool-call index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One tool-call fragment within a chunk delta.
///
/// The first fragment for an index conventionally carries the id and the
/// function name; later fragments append argument text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Tool-call index; fragments for the same call share it.
    pub index: u32,

    /// Tool-call id, on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool kind discriminator, on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ToolType>,

    /// Incremental function data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Incremental function data within a tool-call fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    /// Function name, on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument fragment to append to the accumulated JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    fn base(id: impl Into<String>, model: impl Into<String>, delta: ChatMessageDelta) -> Self {
        Self {
            id: id.into(),
            object: ObjectType::ChatCompletionChunk,
            created: unix_timestamp(),
            model: model.into(),
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Builds a chunk carrying a single content fragment.
    pub fn content(id: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::base(
            id,
            model,
            ChatMessageDelta {
                content: Some(text.into()),
                ..Default::default()
            },
        )
    }

    /// Builds a chunk carrying one complete tool call.
    ///
    /// Used by policies that buffer tool calls and re-emit them as a
    /// single synthesized chunk.
    pub fn tool_call(
        id: impl Into<String>,
        model: impl Into<String>,
        index: u32,
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::base(
            id,
            model,
            ChatMessageDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index,
                    id: Some(call_id.into()),
                    r#type: Some(ToolType::Function),
                    function: Some(FunctionCallDelta {
                        name: Some(name.into()),
                        arguments: Some(arguments.into()),
                    }),
                }]),
                ..Default::default()
            },
        )
    }

    /// Builds a chunk carrying only a finish reason.
    pub fn finish(id: impl Into<String>, model: impl Into<String>, reason: FinishReason) -> Self {
        let mut chunk = Self::base(id, model, ChatMessageDelta::default());
        chunk.choices[0].finish_reason = Some(reason);
        chunk
    }

    /// The content fragment of the first choice, if any.
    pub fn content_delta(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    /// The finish reason of the first choice, if any.
    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.choices.first()?.finish_reason.as_ref()
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Error response body compatible with the OpenAI API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetails,
}

/// Error details within an [`ErrorResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Human-readable error message.
    pub message: String,
    /// Machine-readable error type.
    pub r#type: String,
    /// HTTP status code mirrored into the body.
    pub code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_request_with_unknown_fields() {
        let json = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "logit_bias": {"50256": -100},
            "seed": 42
        });

        let request: ChatCompletionRequest = serde_json::from_value(json).unwrap();

        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.extra.get("seed"), Some(&json!(42)));

        let round_trip = serde_json::to_value(&request).unwrap();
        assert_eq!(round_trip["logit_bias"], json!({"50256": -100}));
    }

    #[test]
    fn deserialize_tool_call_fragments() {
        let first: ToolCallDelta = serde_json::from_value(json!({
            "index": 0,
            "id": "call_abc",
            "type": "function",
            "function": {"name": "get_weather", "arguments": ""}
        }))
        .unwrap();

        assert_eq!(first.id.as_deref(), Some("call_abc"));
        assert_eq!(first.function.as_ref().unwrap().name.as_deref(), Some("get_weather"));

        let later: ToolCallDelta = serde_json::from_value(json!({
            "index": 0,
            "function": {"arguments": "{\"loc\""}
        }))
        .unwrap();

        assert!(later.id.is_none());
        assert_eq!(later.function.unwrap().arguments.as_deref(), Some("{\"loc\""));
    }

    #[test]
    fn chunk_builders_produce_wire_shape() {
        let chunk = ChatCompletionChunk::content("chatcmpl-1", "gpt-4", "Hello");
        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "Hello");
        assert!(json["choices"][0]["delta"].get("tool_calls").is_none());

        let finish = ChatCompletionChunk::finish("chatcmpl-1", "gpt-4", FinishReason::ToolCalls);
        let json = serde_json::to_value(&finish).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn unknown_finish_reason_passes_through() {
        let reason: FinishReason = serde_json::from_value(json!("pause_turn")).unwrap();
        assert_eq!(reason, FinishReason::Other("pause_turn".to_string()));
        assert_eq!(reason.to_string(), "pause_turn");
    }

    #[test]
    fn message_content_text_flattens_parts() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look at "},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
                {"type": "text", "text": "this"}
            ]
        }))
        .unwrap();

        assert_eq!(message.content_text().as_deref(), Some("look at this"));
    }
}
