//! The policy trait and its execution contexts.
//!
//! A policy is a user-supplied object implementing any subset of the
//! hooks below; the default bodies pass through or do nothing, so a
//! policy only overrides what it cares about. For a single transaction
//! the hooks run strictly sequentially on one logical task, so a policy
//! never needs locks for its own scratchpad. Across transactions the
//! executor runs in parallel and a policy instance is shared, so any
//! state beyond the scratchpad must be safe under concurrent access.

use async_trait::async_trait;
use llm::messages::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use observability::{EventEmitter, PolicyEvent, Severity};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::blocks::{StreamBlock, StreamState};
use crate::error::{PolicyError, PolicyRejection};
use crate::orchestrator::DeadlineHandle;
use crate::recorder::TransactionRecorder;
use crate::transaction::{Scratchpad, Transaction};

/// Per-transaction state shared by every hook invocation.
///
/// Holds only identifiers and collaborator handles; policies reach it
/// through the [`PolicyContext`] and [`StreamingContext`] views.
pub struct TransactionContext {
    transaction: Transaction,
    scratchpad: Scratchpad,
    emitter: EventEmitter,
    recorder: Arc<TransactionRecorder>,
    egress: Option<mpsc::Sender<ChatCompletionChunk>>,
    egress_open: bool,
    keepalive: Option<DeadlineHandle>,
}

impl TransactionContext {
    /// Creates the context for one transaction.
    pub fn new(transaction: Transaction, emitter: EventEmitter, recorder: Arc<TransactionRecorder>) -> Self {
        Self {
            transaction,
            scratchpad: Scratchpad::new(),
            emitter,
            recorder,
            egress: None,
            egress_open: false,
            keepalive: None,
        }
    }

    /// Wires the egress queue and the deadline handle in when streaming
    /// starts.
    pub fn connect_egress(&mut self, egress: mpsc::Sender<ChatCompletionChunk>, keepalive: DeadlineHandle) {
        self.egress = Some(egress);
        self.egress_open = true;
        self.keepalive = Some(keepalive);
    }

    /// Closes the egress queue; later pushes fail.
    pub(crate) fn close_egress(&mut self) {
        self.egress = None;
        self.egress_open = false;
    }

    /// The transaction this context belongs to.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// A request/response hook view over this context.
    pub fn policy_context(&mut self) -> PolicyContext<'_> {
        PolicyContext { inner: self }
    }

    pub(crate) fn emit_event(
        &self,
        event_type: &str,
        summary: &str,
        severity: Severity,
        details: serde_json::Map<String, serde_json::Value>,
    ) {
        self.emitter.policy_event(PolicyEvent::new(
            self.transaction.id.clone(),
            self.transaction.trace_id.clone(),
            event_type,
            summary,
            severity,
            details,
        ));
    }

    pub(crate) async fn push_chunk(&mut self, chunk: ChatCompletionChunk) -> Result<(), PolicyError> {
        if !self.egress_open {
            return Err(PolicyError::new("push after egress queue closed"));
        }

        let Some(egress) = &self.egress else {
            return Err(PolicyError::new("push before streaming started"));
        };

        self.recorder.add_egress_chunk(&chunk);

        self.emitter.pipeline(
            observability::PipelineStage::ClientChunkSent,
            &self.transaction.id,
            self.transaction.trace_id.clone(),
            serde_json::to_value(&chunk).unwrap_or(serde_json::Value::Null),
        );

        if let Some(keepalive) = &self.keepalive {
            keepalive.keepalive();
        }

        egress
            .send(chunk)
            .await
            .map_err(|_| PolicyError::new("egress queue receiver dropped"))
    }
}

/// Context view for the request/response hooks.
pub struct PolicyContext<'a> {
    pub(crate) inner: &'a mut TransactionContext,
}

impl PolicyContext<'_> {
    /// The transaction identifier.
    pub fn transaction_id(&self) -> &str {
        &self.inner.transaction.id
    }

    /// The upstream model identifier.
    pub fn model(&self) -> &str {
        &self.inner.transaction.model
    }

    /// The per-transaction scratchpad.
    pub fn scratchpad(&mut self) -> &mut Scratchpad {
        &mut self.inner.scratchpad
    }

    /// Emits a policy event to the observability fanout.
    pub fn emit(
        &self,
        event_type: &str,
        summary: &str,
        severity: Severity,
        details: serde_json::Map<String, serde_json::Value>,
    ) {
        self.inner.emit_event(event_type, summary, severity, details);
    }
}

/// Context view for the streaming hooks.
///
/// Exposes the current chunk (read-only), the stream state, the egress
/// `push`, the event emitter, the scratchpad, and the transaction
/// identifier. It never exposes the raw upstream iterator.
pub struct StreamingContext<'a> {
    pub(crate) chunk: Option<&'a ChatCompletionChunk>,
    pub(crate) state: &'a StreamState,
    pub(crate) inner: &'a mut TransactionContext,
}

impl<'a> StreamingContext<'a> {
    /// The chunk the current hook was invoked for. Absent for the
    /// stream-end hooks.
    pub fn chunk(&self) -> Option<&'a ChatCompletionChunk> {
        self.chunk
    }

    /// The aggregation state, including all blocks created so far.
    pub fn state(&self) -> &'a StreamState {
        self.state
    }

    /// The block that completed on this chunk, if any.
    pub fn just_completed(&self) -> Option<&'a StreamBlock> {
        self.state.just_completed_block()
    }

    /// The transaction identifier.
    pub fn transaction_id(&self) -> &str {
        &self.inner.transaction.id
    }

    /// The upstream model identifier.
    pub fn model(&self) -> &str {
        &self.inner.transaction.model
    }

    /// The per-transaction scratchpad.
    pub fn scratchpad(&mut self) -> &mut Scratchpad {
        &mut self.inner.scratchpad
    }

    /// Enqueues a chunk onto the egress queue.
    ///
    /// Suspends when the client is slow (the queue is bounded) and
    /// resets the inactivity deadline on success.
    pub async fn push(&mut self, chunk: ChatCompletionChunk) -> Result<(), PolicyError> {
        self.inner.push_chunk(chunk).await
    }

    /// Resets the inactivity deadline without producing a chunk.
    ///
    /// For policies doing slow out-of-band work, e.g. a judge LLM call.
    pub fn keepalive(&self) {
        if let Some(keepalive) = &self.inner.keepalive {
            keepalive.keepalive();
        }
    }

    /// Emits a policy event to the observability fanout.
    pub fn emit(
        &self,
        event_type: &str,
        summary: &str,
        severity: Severity,
        details: serde_json::Map<String, serde_json::Value>,
    ) {
        self.inner.emit_event(event_type, summary, severity, details);
    }
}

/// A policy that may inspect, rewrite, replace, or block request data,
/// response data, and individual chunks of a streaming response.
///
/// Hook invocation order for one chunk: `on_chunk_received` first, then
/// the completion hook for a block that just closed, then the delta hook
/// matching the chunk's payload, then `on_finish_reason` when the chunk
/// carries one. `on_stream_complete` runs after the last chunk and may
/// still push; `on_streaming_policy_complete` runs after egress is
/// drained and must not.
#[allow(unused_variables)]
#[async_trait]
pub trait Policy: Send + Sync {
    /// Rewrites the request before upstream dispatch, or rejects it.
    async fn on_request(
        &self,
        request: ChatCompletionRequest,
        ctx: &mut PolicyContext<'_>,
    ) -> Result<ChatCompletionRequest, PolicyRejection> {
        Ok(request)
    }

    /// Rewrites the final response on the non-streaming path.
    async fn on_response(
        &self,
        response: ChatCompletionResponse,
        ctx: &mut PolicyContext<'_>,
    ) -> Result<ChatCompletionResponse, PolicyRejection> {
        Ok(response)
    }

    /// Sees every raw normalized chunk, before any block hooks.
    ///
    /// Default passthrough policies push the chunk to egress here;
    /// transforming policies leave this empty and push from the block
    /// hooks instead.
    async fn on_chunk_received(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// A content delta was merged into the current block.
    async fn on_content_delta(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// A content block transitioned to complete.
    async fn on_content_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// A tool-call fragment was merged into the current block.
    async fn on_tool_call_delta(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// A tool-call block transitioned to complete.
    async fn on_tool_call_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The chunk carried a finish reason; trailing text may still be
    /// pushed.
    async fn on_finish_reason(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// The last chunk has been processed; cleanup that may still push.
    async fn on_stream_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }

    /// Egress is fully drained; pure cleanup, must not push.
    async fn on_streaming_policy_complete(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Policy")
    }
}
