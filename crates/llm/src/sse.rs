//! Anthropic SSE event assembly from canonical streaming chunks.
//!
//! The pipeline normalizes every provider stream to canonical OpenAI-style
//! chunks for policy consistency, which loses Anthropic's explicit block
//! lifecycle. Anthropic clients require proper event sequences with
//! sequential indices (`content_block_start` → `content_block_delta` →
//! `content_block_stop`), so this module reconstructs them:
//!
//! - [`describe_chunk`] - stateless chunk → event descriptor conversion
//! - [`EventAssembler`] - stateful assembly that tracks block indices and
//!   manages the open/close lifecycle

use crate::convert::stop_reason_from_finish;
use crate::messages::{anthropic, openai};

/// Stateless classification of a canonical chunk.
#[derive(Debug)]
enum Descriptor {
    /// A complete tool call in one chunk, as pushed by buffering policies.
    CompleteToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Start of a progressively streamed tool call.
    ToolCallStart { id: String, name: String },
    /// Argument fragment of a progressively streamed tool call.
    InputJsonDelta(String),
    /// Text fragment.
    TextDelta(String),
    /// Finish reason carried by the chunk.
    Finish(openai::FinishReason),
    /// Nothing to emit (role-only or empty chunk).
    Empty,
}

fn describe_chunk(chunk: &openai::ChatCompletionChunk) -> Descriptor {
    let Some(choice) = chunk.choices.first() else {
        return Descriptor::Empty;
    };

    if let Some(fragment) = choice.delta.tool_calls.as_ref().and_then(|calls| calls.first()) {
        let id = fragment.id.clone().filter(|id| !id.is_empty());
        let name = fragment
            .function
            .as_ref()
            .and_then(|function| function.name.clone())
            .unwrap_or_default();
        let arguments = fragment
            .function
            .as_ref()
            .and_then(|function| function.arguments.clone())
            .filter(|arguments| !arguments.is_empty());

        return match (id, arguments) {
            (Some(id), Some(arguments)) => Descriptor::CompleteToolCall { id, name, arguments },
            (Some(id), None) => Descriptor::ToolCallStart { id, name },
            (None, Some(arguments)) => Descriptor::InputJsonDelta(arguments),
            (None, None) => Descriptor::InputJsonDelta(String::new()),
        };
    }

    if let Some(content) = choice.delta.content.as_ref()
        && !content.is_empty()
    {
        return Descriptor::TextDelta(content.clone());
    }

    if let Some(reason) = choice.finish_reason.clone() {
        return Descriptor::Finish(reason);
    }

    Descriptor::Empty
}

/// Assembles Anthropic stream events from canonical chunks.
///
/// Tracks one block index counter and whether a block is currently open.
/// The surrounding formatter is responsible for the enclosing
/// `message_start` and `message_stop` events.
#[derive(Debug, Default)]
pub struct EventAssembler {
    block_open: bool,
    block_index: u32,
    usage: anthropic::UsageInfo,
}

impl EventAssembler {
    /// Creates an assembler with the block index at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one post-policy chunk and returns the events to emit.
    pub fn process_chunk(&mut self, chunk: &openai::ChatCompletionChunk) -> Vec<anthropic::StreamEvent> {
        if let Some(usage) = chunk.usage {
            self.usage = anthropic::UsageInfo {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let mut events = Vec::new();

        let descriptor = describe_chunk(chunk);
        let descriptor_was_finish = matches!(descriptor, Descriptor::Finish(_));

        match descriptor {
            Descriptor::CompleteToolCall { id, name, arguments } => {
                self.close_open_block(&mut events);

                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                });
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: anthropic::ContentDelta::InputJsonDelta {
                        partial_json: arguments,
                    },
                });
                events.push(anthropic::StreamEvent::ContentBlockStop {
                    index: self.block_index,
                });
                self.block_index += 1;
            }

            Descriptor::ToolCallStart { id, name } => {
                self.close_open_block(&mut events);

                self.block_open = true;
                events.push(anthropic::StreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                });
            }

            Descriptor::InputJsonDelta(partial_json) => {
                self.ensure_block_open(&mut events);
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: anthropic::ContentDelta::InputJsonDelta { partial_json },
                });
            }

            Descriptor::TextDelta(text) => {
                self.ensure_block_open(&mut events);
                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: anthropic::ContentDelta::TextDelta { text },
                });
            }

            Descriptor::Finish(reason) => {
                self.emit_finish(reason, &mut events);
            }

            Descriptor::Empty => {}
        }

        // A finish reason riding on a payload chunk still closes the
        // stream properly.
        if !descriptor_was_finish
            && let Some(reason) = chunk.finish_reason()
        {
            self.emit_finish(reason.clone(), &mut events);
        }

        events
    }

    fn emit_finish(&mut self, reason: openai::FinishReason, events: &mut Vec<anthropic::StreamEvent>) {
        if self.block_open {
            events.push(anthropic::StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_open = false;
        }

        events.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDeltaData {
                stop_reason: Some(stop_reason_from_finish(reason)),
                stop_sequence: None,
            },
            usage: self.usage,
        });
    }

    /// Closes a dangling open block, for streams that end without a
    /// finish reason.
    pub fn finish(&mut self) -> Vec<anthropic::StreamEvent> {
        let mut events = Vec::new();
        self.close_open_block(&mut events);
        events
    }

    fn close_open_block(&mut self, events: &mut Vec<anthropic::StreamEvent>) {
        if self.block_open {
            events.push(anthropic::StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_open = false;
            self.block_index += 1;
        }
    }

    fn ensure_block_open(&mut self, events: &mut Vec<anthropic::StreamEvent>) {
        if !self.block_open {
            self.block_open = true;
            events.push(anthropic::StreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block: anthropic::ContentBlock::Text { text: String::new() },
            });
        }
    }
}
