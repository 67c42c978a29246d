use llm::messages::openai::ChatCompletionChunk;

/// Capacity of the bounded control channel between the forward task and
/// the orchestrator. A slow policy backpressures the upstream through it.
pub const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// Control messages between pipeline stages.
///
/// A well-formed stream ends with exactly one `End`; `Error` is terminal
/// and mutually exclusive with `End`.
#[derive(Debug)]
pub enum ControlMessage {
    /// One upstream chunk.
    Chunk(Box<ChatCompletionChunk>),
    /// Advisory liveness signal; resets the inactivity deadline without
    /// producing a chunk.
    Keepalive,
    /// The upstream drained normally.
    End,
    /// The upstream failed; terminal.
    Error(String),
}
