//! Conversions from the canonical schema to Anthropic protocol types.

use serde_json::Value;

use crate::messages::{anthropic, openai};

impl From<openai::ChatCompletionRequest> for anthropic::MessagesRequest {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<anthropic::Message> = Vec::new();

        for message in req.messages {
            match message.role {
                openai::ChatRole::System => {
                    if let Some(text) = message.content_text() {
                        system_parts.push(text);
                    }
                }
                openai::ChatRole::Tool => {
                    // Tool results fold into a user message with a
                    // tool_result block.
                    let block = anthropic::ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: Value::String(message.content_text().unwrap_or_default()),
                        is_error: None,
                    };
                    push_block(&mut messages, anthropic::Role::User, block);
                }
                openai::ChatRole::Assistant => {
                    let mut blocks = Vec::new();

                    if let Some(text) = message.content_text()
                        && !text.is_empty()
                    {
                        blocks.push(anthropic::ContentBlock::Text { text });
                    }

                    for call in message.tool_calls.unwrap_or_default() {
                        blocks.push(anthropic::ContentBlock::ToolUse {
                            id: call.id,
                            name: call.function.name,
                            input: parse_tool_arguments(&call.function.arguments),
                        });
                    }

                    if !blocks.is_empty() {
                        messages.push(anthropic::Message {
                            role: anthropic::Role::Assistant,
                            content: anthropic::MessageContent::Blocks(blocks),
                        });
                    }
                }
                openai::ChatRole::User | openai::ChatRole::Other(_) => {
                    messages.push(anthropic::Message {
                        role: anthropic::Role::User,
                        content: anthropic::MessageContent::Text(message.content_text().unwrap_or_default()),
                    });
                }
            }
        }

        let tools = req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| anthropic::ToolDefinition {
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool.function.parameters,
                })
                .collect()
        });

        Self {
            model: req.model,
            messages,
            // Anthropic requires max_tokens.
            max_tokens: req.max_tokens.unwrap_or(4096),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: None,
            stop_sequences: req.stop,
            stream: req.stream,
            tools,
            extra: serde_json::Map::new(),
        }
    }
}

fn push_block(messages: &mut Vec<anthropic::Message>, role: anthropic::Role, block: anthropic::ContentBlock) {
    // Consecutive tool results merge into one user message.
    if let Some(last) = messages.last_mut()
        && last.role == role
        && let anthropic::MessageContent::Blocks(blocks) = &mut last.content
    {
        blocks.push(block);
        return;
    }

    messages.push(anthropic::Message {
        role,
        content: anthropic::MessageContent::Blocks(vec![block]),
    });
}

impl From<openai::ChatCompletionResponse> for anthropic::MessagesResponse {
    fn from(response: openai::ChatCompletionResponse) -> Self {
        let usage = response.usage.unwrap_or_default();
        let mut content = Vec::new();
        let mut stop_reason = None;

        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(text) = choice.message.content_text()
                && !text.is_empty()
            {
                content.push(anthropic::ContentBlock::Text { text });
            }

            for call in choice.message.tool_calls.unwrap_or_default() {
                content.push(anthropic::ContentBlock::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input: parse_tool_arguments(&call.function.arguments),
                });
            }

            stop_reason = choice.finish_reason.map(stop_reason_from_finish);
        }

        Self {
            id: response.id,
            r#type: "message".to_string(),
            role: anthropic::Role::Assistant,
            content,
            model: response.model,
            stop_reason,
            stop_sequence: None,
            usage: anthropic::UsageInfo {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }
    }
}

/// Maps a canonical finish reason onto an Anthropic stop reason.
///
/// Unrecognized reasons pass through verbatim.
pub fn stop_reason_from_finish(reason: openai::FinishReason) -> anthropic::StopReason {
    match reason {
        openai::FinishReason::Stop => anthropic::StopReason::EndTurn,
        openai::FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
        openai::FinishReason::Length => anthropic::StopReason::MaxTokens,
        openai::FinishReason::ContentFilter => anthropic::StopReason::Other("content_filter".to_string()),
        openai::FinishReason::Other(reason) => anthropic::StopReason::Other(reason),
    }
}

/// Parses an accumulated tool-argument string into a JSON value.
///
/// An empty string becomes an empty object. Non-empty input that fails to
/// parse is carried verbatim as a string so nothing is lost on the wire;
/// the pipeline reports the parse failure separately.
pub fn parse_tool_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}
