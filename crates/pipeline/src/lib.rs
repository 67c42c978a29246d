//! The streaming policy pipeline.
//!
//! This crate binds the upstream chunk source, the block assembler, the
//! policy hook machine, and the client formatter into one concurrent
//! pipeline per transaction:
//!
//! ```text
//!   upstream ──► [forward task] ──► policy/assembler ──► [egress queue] ──► client stream
//! ```
//!
//! Within one transaction everything runs sequentially on one logical
//! task: the assembler folds each canonical chunk into block state, the
//! executor drives the policy hooks, and hook pushes land on the bounded
//! egress queue the client formatter drains. Liveness is enforced by a
//! keepalive-reset inactivity deadline; a client disconnect cancels the
//! whole arrangement with a clean policy tear-down.

mod assembler;
mod blocks;
mod control;
mod error;
mod executor;
mod formatter;
mod orchestrator;
mod policy;
mod recorder;
mod transaction;

pub use assembler::{ChunkAssembler, FoldedChunk};
pub use blocks::{ContentBlock, StreamBlock, StreamState, ToolCallBlock};
pub use control::{CONTROL_CHANNEL_CAPACITY, ControlMessage};
pub use error::{PolicyError, PolicyRejection, StreamError};
pub use executor::{ChunkOutcome, PolicyExecutor};
pub use formatter::{SseFrame, sse_frames};
pub use orchestrator::{
    DeadlineHandle, DeadlineMonitor, StreamOrchestrator, StreamOutcome, StreamSession, start_stream,
    start_stream_with_context,
};
pub use policy::{Policy, PolicyContext, StreamingContext, TransactionContext};
pub use recorder::{TransactionRecorder, reconstruct};
pub use transaction::{ClientFormat, Scratchpad, Transaction};
