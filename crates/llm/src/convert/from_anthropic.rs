//! Conversions from Anthropic protocol types to the canonical schema.

use serde_json::Value;

use crate::messages::{anthropic, openai};

impl From<anthropic::MessagesRequest> for openai::ChatCompletionRequest {
    fn from(req: anthropic::MessagesRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        // Anthropic keeps the system prompt outside the messages array.
        if let Some(system) = req.system {
            messages.push(openai::ChatMessage::text(openai::ChatRole::System, system));
        }

        for message in req.messages {
            flatten_message(message, &mut messages);
        }

        let tools = req
            .tools
            .map(|tools| tools.into_iter().map(openai::Tool::from).collect());

        Self {
            model: req.model,
            messages,
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop_sequences,
            stream: req.stream,
            tools,
            tool_choice: None,
            extra: req.extra,
        }
    }
}

/// Flattens one Anthropic message into canonical messages.
///
/// Typed content parts split apart: text parts concatenate into one
/// message, tool_use parts become assistant tool calls, and tool_result
/// parts become separate role=tool messages keyed by tool_use_id.
fn flatten_message(message: anthropic::Message, out: &mut Vec<openai::ChatMessage>) {
    let role = match message.role {
        anthropic::Role::User => openai::ChatRole::User,
        anthropic::Role::Assistant => openai::ChatRole::Assistant,
    };

    let blocks = match message.content {
        anthropic::MessageContent::Text(text) => {
            out.push(openai::ChatMessage::text(role, text));
            return;
        }
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<openai::ToolCall> = Vec::new();
    let mut tool_results: Vec<openai::ChatMessage> = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text } => text_parts.push(text),
            anthropic::ContentBlock::Image { .. } => {
                // Image inputs are not forwarded through the canonical
                // text path; the upstream clients do not support them.
                log::debug!("dropping image content block in request conversion");
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    r#type: openai::ToolType::Function,
                    function: openai::FunctionCall {
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            anthropic::ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                tool_results.push(openai::ChatMessage {
                    role: openai::ChatRole::Tool,
                    content: Some(openai::MessageContent::Text(tool_result_text(content))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
        }
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        out.push(openai::ChatMessage {
            role,
            content: if text_parts.is_empty() {
                None
            } else {
                Some(openai::MessageContent::Text(text_parts.concat()))
            },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        });
    }

    out.extend(tool_results);
}

/// Extracts a text payload from a tool_result content value, which may be
/// a bare string or a list of typed blocks.
fn tool_result_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| {
                item.get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
            })
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<anthropic::ToolDefinition> for openai::Tool {
    fn from(tool: anthropic::ToolDefinition) -> Self {
        Self {
            r#type: openai::ToolType::Function,
            function: openai::FunctionDefinition {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        }
    }
}

impl From<anthropic::StopReason> for openai::FinishReason {
    fn from(reason: anthropic::StopReason) -> Self {
        match reason {
            anthropic::StopReason::EndTurn => openai::FinishReason::Stop,
            anthropic::StopReason::MaxTokens => openai::FinishReason::Length,
            anthropic::StopReason::StopSequence => openai::FinishReason::Stop,
            anthropic::StopReason::ToolUse => openai::FinishReason::ToolCalls,
            anthropic::StopReason::Other(reason) => openai::FinishReason::Other(reason),
        }
    }
}

impl From<anthropic::UsageInfo> for openai::Usage {
    fn from(usage: anthropic::UsageInfo) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

impl From<anthropic::MessagesResponse> for openai::ChatCompletionResponse {
    fn from(response: anthropic::MessagesResponse) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                anthropic::ContentBlock::Text { text: t } => text.push_str(&t),
                anthropic::ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(openai::ToolCall {
                        id,
                        r#type: openai::ToolType::Function,
                        function: openai::FunctionCall {
                            name,
                            arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }
                // Tool results and images do not appear in responses.
                _ => {}
            }
        }

        Self {
            id: response.id,
            object: openai::ObjectType::ChatCompletion,
            created: crate::messages::openai::unix_timestamp(),
            model: response.model,
            choices: vec![openai::ChatChoice {
                index: 0,
                message: openai::ChatMessage {
                    role: openai::ChatRole::Assistant,
                    content: if text.is_empty() {
                        None
                    } else {
                        Some(openai::MessageContent::Text(text))
                    },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                },
                finish_reason: response.stop_reason.map(openai::FinishReason::from),
            }],
            usage: Some(openai::Usage::from(response.usage)),
        }
    }
}
