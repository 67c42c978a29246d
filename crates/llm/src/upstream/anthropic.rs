use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{UpstreamError, UpstreamResult};
use crate::messages::{anthropic, openai};
use crate::upstream::{ChatStream, Upstream};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
///
/// Requests are re-expressed in Anthropic form on the way out; streaming
/// events are normalized back into canonical chunks on the way in so the
/// policy pipeline sees one schema regardless of provider.
pub struct AnthropicUpstream {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl AnthropicUpstream {
    pub fn new(base_url: Option<String>, api_key: SecretString) -> UpstreamResult<Self> {
        let client = Client::builder().build().map_err(|e| {
            log::error!("Failed to create HTTP client for Anthropic upstream: {e}");
            UpstreamError::InternalError(None)
        })?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string()),
            api_key,
        })
    }

    async fn dispatch(&self, request: &anthropic::MessagesRequest) -> UpstreamResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);

        let body = sonic_rs::to_vec(request).map_err(|e| {
            log::error!("Failed to serialize Anthropic request: {e}");
            UpstreamError::InternalError(None)
        })?;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| UpstreamError::ConnectionError(format!("Failed to send request to Anthropic: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Anthropic API error ({status}): {error_text}");
            return Err(UpstreamError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Upstream for AnthropicUpstream {
    async fn chat(&self, mut request: openai::ChatCompletionRequest) -> UpstreamResult<openai::ChatCompletionResponse> {
        request.stream = Some(false);
        let anthropic_request = anthropic::MessagesRequest::from(request);

        let response = self.dispatch(&anthropic_request).await?;

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Anthropic response body: {e}");
            UpstreamError::InternalError(None)
        })?;

        let anthropic_response: anthropic::MessagesResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Anthropic chat completion response: {e}");
            log::error!("Raw response that failed to parse: {response_text}");
            UpstreamError::InternalError(None)
        })?;

        Ok(openai::ChatCompletionResponse::from(anthropic_response))
    }

    async fn chat_stream(&self, mut request: openai::ChatCompletionRequest) -> UpstreamResult<ChatStream> {
        request.stream = Some(true);
        let anthropic_request = anthropic::MessagesRequest::from(request);

        let response = self.dispatch(&anthropic_request).await?;
        let event_stream = response.bytes_stream().eventsource();

        // unfold keeps the normalization state alive across events.
        let chunk_stream = futures::stream::unfold(
            (Box::pin(event_stream), StreamNormalizer::new()),
            |(mut stream, mut normalizer)| async move {
                loop {
                    let event = stream.next().await?;

                    let Ok(event) = event else {
                        log::warn!("SSE parsing error in Anthropic stream");
                        continue;
                    };

                    let Ok(anthropic_event) = sonic_rs::from_str::<anthropic::StreamEvent>(&event.data) else {
                        log::warn!("Failed to parse Anthropic streaming event");
                        continue;
                    };

                    if let anthropic::StreamEvent::Error { error } = &anthropic_event {
                        let error = UpstreamError::ProviderApiError {
                            status: 502,
                            message: format!("{}: {}", error.r#type, error.message),
                        };
                        return Some((Err(error), (stream, normalizer)));
                    }

                    if let Some(chunk) = normalizer.process_event(anthropic_event) {
                        return Some((Ok(chunk), (stream, normalizer)));
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// State machine converting Anthropic stream events to canonical chunks.
///
/// Anthropic's format carries explicit lifecycle events with block indices;
/// the canonical format carries bare deltas with tool-call indices. State
/// tracked across events:
///
/// - message id and model from `message_start`
/// - cumulative usage
/// - the mapping from Anthropic block index to canonical tool-call index
pub struct StreamNormalizer {
    message_id: String,
    model: String,
    created: u64,
    usage: Option<openai::Usage>,
    next_tool_index: u32,
    tool_index_by_block: HashMap<u32, u32>,
}

impl StreamNormalizer {
    pub fn new() -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            created: crate::messages::openai::unix_timestamp(),
            usage: None,
            next_tool_index: 0,
            tool_index_by_block: HashMap::new(),
        }
    }

    fn chunk(&self, delta: openai::ChatMessageDelta) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk {
            id: self.message_id.clone(),
            object: openai::ObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![openai::ChatChoiceDelta {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Processes one Anthropic event, returning a canonical chunk when
    /// the event carries payload the pipeline needs to see.
    pub fn process_event(&mut self, event: anthropic::StreamEvent) -> Option<openai::ChatCompletionChunk> {
        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;
                self.usage = Some(openai::Usage {
                    prompt_tokens: message.usage.input_tokens,
                    completion_tokens: message.usage.output_tokens,
                    total_tokens: message.usage.input_tokens + message.usage.output_tokens,
                });

                Some(self.chunk(openai::ChatMessageDelta {
                    role: Some(openai::ChatRole::Assistant),
                    ..Default::default()
                }))
            }

            anthropic::StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                anthropic::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_index_by_block.insert(index, tool_index);

                    Some(self.chunk(openai::ChatMessageDelta {
                        tool_calls: Some(vec![openai::ToolCallDelta {
                            index: tool_index,
                            id: Some(id),
                            r#type: Some(openai::ToolType::Function),
                            function: Some(openai::FunctionCallDelta {
                                name: Some(name),
                                arguments: None,
                            }),
                        }]),
                        ..Default::default()
                    }))
                }
                // Text blocks produce nothing at start; deltas follow.
                _ => None,
            },

            anthropic::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                anthropic::ContentDelta::TextDelta { text } => Some(self.chunk(openai::ChatMessageDelta {
                    content: Some(text),
                    ..Default::default()
                })),
                anthropic::ContentDelta::InputJsonDelta { partial_json } => {
                    let tool_index = *self.tool_index_by_block.get(&index)?;

                    Some(self.chunk(openai::ChatMessageDelta {
                        tool_calls: Some(vec![openai::ToolCallDelta {
                            index: tool_index,
                            id: None,
                            r#type: None,
                            function: Some(openai::FunctionCallDelta {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                        ..Default::default()
                    }))
                }
            },

            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                let prompt_tokens = self.usage.map(|u| u.prompt_tokens).unwrap_or(usage.input_tokens);
                let usage = openai::Usage {
                    prompt_tokens,
                    completion_tokens: usage.output_tokens,
                    total_tokens: prompt_tokens + usage.output_tokens,
                };
                self.usage = Some(usage);

                let mut chunk = self.chunk(openai::ChatMessageDelta::default());
                chunk.choices[0].finish_reason = delta.stop_reason.map(openai::FinishReason::from);
                chunk.usage = Some(usage);
                Some(chunk)
            }

            // Pings, block stops, and message_stop carry nothing the
            // canonical schema needs.
            _ => None,
        }
    }
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> anthropic::StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn normalizes_text_stream() {
        let mut normalizer = StreamNormalizer::new();

        let start = normalizer
            .process_event(event(json!({
                "type": "message_start",
                "message": {
                    "id": "msg_1", "type": "message", "role": "assistant",
                    "content": [], "model": "claude-sonnet-4-20250514",
                    "usage": {"input_tokens": 12, "output_tokens": 0}
                }
            })))
            .unwrap();
        assert_eq!(start.id, "msg_1");
        assert_eq!(
            start.choices[0].delta.role,
            Some(openai::ChatRole::Assistant)
        );

        assert!(
            normalizer
                .process_event(event(json!({
                    "type": "content_block_start", "index": 0,
                    "content_block": {"type": "text", "text": ""}
                })))
                .is_none()
        );

        let delta = normalizer
            .process_event(event(json!({
                "type": "content_block_delta", "index": 0,
                "delta": {"type": "text_delta", "text": "Hello"}
            })))
            .unwrap();
        assert_eq!(delta.content_delta(), Some("Hello"));

        let finish = normalizer
            .process_event(event(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                "usage": {"output_tokens": 9}
            })))
            .unwrap();
        assert_eq!(
            finish.finish_reason(),
            Some(&openai::FinishReason::Stop)
        );
        assert_eq!(finish.usage.unwrap().prompt_tokens, 12);
        assert_eq!(finish.usage.unwrap().output_tokens, 9);
    }

    #[test]
    fn maps_block_indices_to_sequential_tool_indices() {
        let mut normalizer = StreamNormalizer::new();

        // Anthropic block 1 is the first tool use (block 0 was text), so
        // it becomes canonical tool-call index 0.
        let start = normalizer
            .process_event(event(json!({
                "type": "content_block_start", "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}
            })))
            .unwrap();

        let fragment = &start.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(fragment.index, 0);
        assert_eq!(fragment.id.as_deref(), Some("toolu_1"));

        let delta = normalizer
            .process_event(event(json!({
                "type": "content_block_delta", "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}
            })))
            .unwrap();

        let fragment = &delta.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(fragment.index, 0);
        assert_eq!(
            fragment.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"q\":")
        );

        // A second tool use at Anthropic block 2 maps to index 1.
        let second = normalizer
            .process_event(event(json!({
                "type": "content_block_start", "index": 2,
                "content_block": {"type": "tool_use", "id": "toolu_2", "name": "fetch", "input": {}}
            })))
            .unwrap();
        assert_eq!(second.choices[0].delta.tool_calls.as_ref().unwrap()[0].index, 1);
    }

    #[test]
    fn ping_and_block_stop_emit_nothing() {
        let mut normalizer = StreamNormalizer::new();

        assert!(normalizer.process_event(event(json!({"type": "ping"}))).is_none());
        assert!(
            normalizer
                .process_event(event(json!({"type": "content_block_stop", "index": 0})))
                .is_none()
        );
        assert!(normalizer.process_event(event(json!({"type": "message_stop"}))).is_none());
    }
}
