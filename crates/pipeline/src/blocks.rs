//! Semantic blocks assembled from streaming deltas.

use llm::messages::openai::{ChatCompletionChunk, FinishReason};

/// A run of text deltas.
#[derive(Debug, Clone, Default)]
pub struct ContentBlock {
    /// Accumulated text.
    pub content: String,
    /// Whether the block has transitioned to complete.
    pub is_complete: bool,
}

/// One tool call accumulated from fragments.
#[derive(Debug, Clone)]
pub struct ToolCallBlock {
    /// Tool-call id: the upstream's if one was seen, otherwise the
    /// synthesized `tool_<index>`.
    pub id: String,
    /// Tool-call index within the response.
    pub index: u32,
    /// Function name; may arrive after the first fragment.
    pub name: String,
    /// Accumulated argument text. Not guaranteed to parse as JSON until
    /// the block is complete, and the policy bears that obligation for
    /// any tool call it rewrites.
    pub arguments: String,
    /// Whether the block has transitioned to complete.
    pub is_complete: bool,
}

/// A semantic grouping of deltas: a text run or one tool call.
#[derive(Debug, Clone)]
pub enum StreamBlock {
    /// Text content block.
    Content(ContentBlock),
    /// Tool-call block.
    ToolCall(ToolCallBlock),
}

impl StreamBlock {
    /// Marks the block complete.
    pub(crate) fn set_complete(&mut self) {
        match self {
            StreamBlock::Content(block) => block.is_complete = true,
            StreamBlock::ToolCall(block) => block.is_complete = true,
        }
    }

    /// Whether the block has completed.
    pub fn is_complete(&self) -> bool {
        match self {
            StreamBlock::Content(block) => block.is_complete,
            StreamBlock::ToolCall(block) => block.is_complete,
        }
    }

    /// The tool-call view of this block, if it is one.
    pub fn as_tool_call(&self) -> Option<&ToolCallBlock> {
        match self {
            StreamBlock::ToolCall(block) => Some(block),
            StreamBlock::Content(_) => None,
        }
    }

    /// The content view of this block, if it is one.
    pub fn as_content(&self) -> Option<&ContentBlock> {
        match self {
            StreamBlock::Content(block) => Some(block),
            StreamBlock::ToolCall(_) => None,
        }
    }
}

/// Per-transaction aggregation state maintained by the assembler.
///
/// Block pointers are indices into `blocks`; at most one block is open at
/// any time, and an open block is always the last one.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Blocks created so far, in order.
    pub blocks: Vec<StreamBlock>,
    /// Index of the block being actively appended to.
    pub current_block: Option<usize>,
    /// Index of the block that completed on this chunk; set for exactly
    /// one callback invocation, then cleared.
    pub just_completed: Option<usize>,
    /// Terminal marker; once set, no further deltas are processed.
    pub finish_reason: Option<FinishReason>,
    /// Append-only log of raw chunks for recording.
    pub raw_chunks: Vec<ChatCompletionChunk>,
}

impl StreamState {
    /// The block currently being appended to.
    pub fn current(&self) -> Option<&StreamBlock> {
        self.current_block.map(|index| &self.blocks[index])
    }

    /// The block that completed on this chunk, if any.
    pub fn just_completed_block(&self) -> Option<&StreamBlock> {
        self.just_completed.map(|index| &self.blocks[index])
    }
}
