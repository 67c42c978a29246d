//! Chunk assembler: folds incoming chunks into block state.
//!
//! Pure state machine, no concurrency. Detects block boundaries
//! (content → tool call, tool_call_N → tool_call_N+1), aggregates deltas
//! within each block, and tracks completion in [`StreamState`].

use std::collections::HashMap;

use llm::messages::openai::ChatCompletionChunk;

use crate::blocks::{ContentBlock, StreamBlock, StreamState, ToolCallBlock};

/// What the assembler observed in a folded chunk.
#[derive(Debug)]
pub struct FoldedChunk {
    /// The chunk as the policy should observe it. During the tool-call
    /// phase an empty-string content field is stripped (an upstream
    /// artifact that confuses policies); the raw chunk log keeps the
    /// original.
    pub chunk: ChatCompletionChunk,
    /// The chunk carried a content fragment.
    pub had_content: bool,
    /// The chunk carried tool-call fragments.
    pub had_tool_calls: bool,
    /// The chunk carried a finish reason; the stream is over.
    pub finished: bool,
}

/// Assembles streaming chunks into semantic blocks.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    state: StreamState,
    tool_id_by_index: HashMap<u32, String>,
    in_tool_call_phase: bool,
}

impl ChunkAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregation state.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Clears the completion marker after the downstream callback returns.
    pub fn clear_just_completed(&mut self) {
        self.state.just_completed = None;
    }

    /// Folds one chunk into the state.
    pub fn fold(&mut self, mut chunk: ChatCompletionChunk) -> FoldedChunk {
        self.state.raw_chunks.push(chunk.clone());

        let Some(choice) = chunk.choices.first() else {
            return FoldedChunk {
                chunk,
                had_content: false,
                had_tool_calls: false,
                finished: false,
            };
        };

        // Content can be actual text, an empty string, or absent; only
        // actual text opens or extends a block.
        let content = choice.delta.content.clone().filter(|content| !content.is_empty());
        let tool_calls = choice.delta.tool_calls.clone().filter(|calls| !calls.is_empty());
        let finish_reason = choice.finish_reason.clone();

        let had_content = content.is_some();
        if let Some(content) = content {
            self.process_content_delta(&content);
        }

        let had_tool_calls = tool_calls.is_some();
        if let Some(fragments) = tool_calls {
            self.process_tool_call_fragments(&fragments);
        }

        let finished = finish_reason.is_some();
        if let Some(reason) = finish_reason {
            self.state.finish_reason = Some(reason);
            self.close_current_block();
        }

        self.strip_empty_content(&mut chunk);

        FoldedChunk {
            chunk,
            had_content,
            had_tool_calls,
            finished,
        }
    }

    fn process_content_delta(&mut self, content: &str) {
        // A tool-call block open when text arrives violates block
        // ordering; close it anyway so the completion is still observed.
        if let Some(index) = self.state.current_block
            && matches!(self.state.blocks[index], StreamBlock::ToolCall(_))
        {
            self.close_current_block();
        }

        let index = match self.state.current_block {
            Some(index) => index,
            None => {
                self.state.blocks.push(StreamBlock::Content(ContentBlock::default()));
                let index = self.state.blocks.len() - 1;
                self.state.current_block = Some(index);
                index
            }
        };

        if let StreamBlock::Content(block) = &mut self.state.blocks[index] {
            block.content.push_str(content);
        }
    }

    fn process_tool_call_fragments(&mut self, fragments: &[llm::messages::openai::ToolCallDelta]) {
        self.in_tool_call_phase = true;

        for fragment in fragments {
            let index = fragment.index;

            // Transitioning to a different block closes the current one.
            if let Some(current) = self.state.current_block {
                let close = match &self.state.blocks[current] {
                    StreamBlock::ToolCall(block) => block.index != index,
                    StreamBlock::Content(_) => true,
                };
                if close {
                    self.close_current_block();
                }
            }

            if let Some(id) = fragment.id.as_ref().filter(|id| !id.is_empty()) {
                self.tool_id_by_index.insert(index, id.clone());
            }

            let resolved_id = self
                .tool_id_by_index
                .entry(index)
                .or_insert_with(|| format!("tool_{index}"))
                .clone();

            let block_index = match self.state.current_block {
                Some(block_index) => block_index,
                None => {
                    self.state.blocks.push(StreamBlock::ToolCall(ToolCallBlock {
                        id: resolved_id.clone(),
                        index,
                        name: String::new(),
                        arguments: String::new(),
                        is_complete: false,
                    }));
                    let block_index = self.state.blocks.len() - 1;
                    self.state.current_block = Some(block_index);
                    block_index
                }
            };

            if let StreamBlock::ToolCall(block) = &mut self.state.blocks[block_index] {
                block.id = resolved_id;

                if let Some(function) = &fragment.function {
                    if let Some(name) = function.name.as_ref().filter(|name| !name.is_empty()) {
                        block.name = name.clone();
                    }
                    if let Some(arguments) = &function.arguments {
                        block.arguments.push_str(arguments);
                    }
                }
            }
        }
    }

    fn close_current_block(&mut self) {
        if let Some(index) = self.state.current_block.take() {
            if !self.state.blocks[index].is_complete() {
                self.state.blocks[index].set_complete();
                self.state.just_completed = Some(index);
            }
        }
    }

    fn strip_empty_content(&self, chunk: &mut ChatCompletionChunk) {
        if !self.in_tool_call_phase {
            return;
        }

        if let Some(choice) = chunk.choices.first_mut()
            && choice.delta.content.as_deref() == Some("")
        {
            choice.delta.content = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::messages::openai::{ChatCompletionChunk, FinishReason, FunctionCallDelta, ToolCallDelta, ToolType};

    fn content_chunk(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk::content("chatcmpl-1", "gpt-4", text)
    }

    fn finish_chunk(reason: FinishReason) -> ChatCompletionChunk {
        ChatCompletionChunk::finish("chatcmpl-1", "gpt-4", reason)
    }

    fn tool_fragment(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> ChatCompletionChunk {
        let mut chunk = ChatCompletionChunk::content("chatcmpl-1", "gpt-4", "");
        chunk.choices[0].delta.content = None;
        chunk.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index,
            id: id.map(str::to_string),
            r#type: id.map(|_| ToolType::Function),
            function: Some(FunctionCallDelta {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }]);
        chunk
    }

    #[test]
    fn content_deltas_accumulate_into_one_block() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(content_chunk("Hello"));
        assembler.fold(content_chunk(" world"));

        let state = assembler.state();
        assert_eq!(state.blocks.len(), 1);
        let block = state.blocks[0].as_content().unwrap();
        assert_eq!(block.content, "Hello world");
        assert!(!block.is_complete);
        assert_eq!(state.current_block, Some(0));
    }

    #[test]
    fn finish_reason_completes_open_block() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(content_chunk("Hi"));
        let folded = assembler.fold(finish_chunk(FinishReason::Stop));

        assert!(folded.finished);
        let state = assembler.state();
        assert_eq!(state.finish_reason, Some(FinishReason::Stop));
        assert!(state.blocks[0].is_complete());
        assert_eq!(state.just_completed, Some(0));
        assert!(state.current_block.is_none());
    }

    #[test]
    fn content_to_tool_transition_completes_content_block() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(content_chunk("Thinking"));
        assembler.fold(tool_fragment(0, Some("call_1"), Some("search"), None));

        let state = assembler.state();
        assert_eq!(state.blocks.len(), 2);
        assert!(state.blocks[0].is_complete());
        assert_eq!(state.just_completed, Some(0));

        let tool = state.blocks[1].as_tool_call().unwrap();
        assert_eq!(tool.id, "call_1");
        assert_eq!(tool.name, "search");
        assert!(!tool.is_complete);
    }

    #[test]
    fn tool_index_change_completes_previous_tool() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(tool_fragment(0, Some("call_1"), Some("first"), Some("{}")));
        assembler.clear_just_completed();
        assembler.fold(tool_fragment(1, Some("call_2"), Some("second"), None));

        let state = assembler.state();
        assert_eq!(state.blocks.len(), 2);
        assert!(state.blocks[0].is_complete());
        assert_eq!(state.just_completed, Some(0));

        let second = state.blocks[1].as_tool_call().unwrap();
        assert_eq!(second.index, 1);
        assert!(!second.is_complete);
    }

    #[test]
    fn arguments_accumulate_across_fragments() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(tool_fragment(0, Some("call_1"), Some("get_weather"), None));
        assembler.fold(tool_fragment(0, None, None, Some("{\"loc\"")));
        assembler.fold(tool_fragment(0, None, None, Some(":\"NYC\"}")));

        let state = assembler.state();
        let tool = state.blocks[0].as_tool_call().unwrap();
        assert_eq!(tool.arguments, "{\"loc\":\"NYC\"}");
    }

    #[test]
    fn missing_tool_id_is_synthesized_deterministically() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(tool_fragment(0, None, Some("anonymous"), Some("{}")));

        let state = assembler.state();
        assert_eq!(state.blocks[0].as_tool_call().unwrap().id, "tool_0");
    }

    #[test]
    fn empty_content_is_stripped_during_tool_phase() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(tool_fragment(0, Some("call_1"), Some("search"), None));

        let mut chunk = tool_fragment(0, None, None, Some("{}"));
        chunk.choices[0].delta.content = Some(String::new());

        let folded = assembler.fold(chunk);
        assert!(folded.chunk.choices[0].delta.content.is_none());

        // The raw chunk log keeps the original, unstripped chunk.
        let raw = assembler.state().raw_chunks.last().unwrap();
        assert_eq!(raw.choices[0].delta.content.as_deref(), Some(""));
    }

    #[test]
    fn empty_content_is_not_stripped_before_tool_phase() {
        let mut assembler = ChunkAssembler::new();

        let mut chunk = content_chunk("");
        chunk.choices[0].delta.content = Some(String::new());

        let folded = assembler.fold(chunk);
        assert_eq!(folded.chunk.choices[0].delta.content.as_deref(), Some(""));
        assert!(assembler.state().blocks.is_empty());
    }

    #[test]
    fn current_block_is_never_complete() {
        let mut assembler = ChunkAssembler::new();

        let chunks = vec![
            content_chunk("a"),
            tool_fragment(0, Some("call_1"), Some("f"), Some("{")),
            tool_fragment(0, None, None, Some("}")),
            tool_fragment(1, Some("call_2"), Some("g"), Some("{}")),
            finish_chunk(FinishReason::ToolCalls),
        ];

        for chunk in chunks {
            assembler.fold(chunk);
            if let Some(block) = assembler.state().current() {
                assert!(!block.is_complete());
            }
            assembler.clear_just_completed();
        }
    }

    #[test]
    fn finish_only_stream_produces_no_blocks() {
        let mut assembler = ChunkAssembler::new();

        let folded = assembler.fold(finish_chunk(FinishReason::Stop));

        assert!(folded.finished);
        let state = assembler.state();
        assert!(state.blocks.is_empty());
        assert!(state.just_completed.is_none());
        assert_eq!(state.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn raw_chunk_log_keeps_every_chunk_in_order() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(content_chunk("a"));
        assembler.fold(content_chunk("b"));
        assembler.fold(finish_chunk(FinishReason::Stop));

        let raw = &assembler.state().raw_chunks;
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].content_delta(), Some("a"));
        assert_eq!(raw[1].content_delta(), Some("b"));
    }

    #[test]
    fn late_real_id_overrides_synthesized_id() {
        let mut assembler = ChunkAssembler::new();

        assembler.fold(tool_fragment(0, None, Some("f"), Some("{")));
        assembler.fold(tool_fragment(0, Some("call_real"), None, Some("}")));

        let state = assembler.state();
        assert_eq!(state.blocks[0].as_tool_call().unwrap().id, "call_real");
    }
}
