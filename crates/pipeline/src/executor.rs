//! Policy executor: drives a chunk through the policy-hook machine.

use std::sync::Arc;

use llm::messages::openai::ChatCompletionChunk;
use observability::Severity;
use serde_json::json;

use crate::assembler::ChunkAssembler;
use crate::blocks::StreamBlock;
use crate::error::{PolicyError, StreamError};
use crate::policy::{Policy, StreamingContext, TransactionContext};

/// Whether the stream continues after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Keep processing.
    Continue,
    /// The chunk carried a finish reason; no further deltas are
    /// processed.
    Finished,
}

/// Invokes policy hooks in a well-defined order for every chunk.
pub struct PolicyExecutor {
    policy: Arc<dyn Policy>,
    assembler: ChunkAssembler,
    ctx: TransactionContext,
}

impl PolicyExecutor {
    /// Creates an executor bound to one transaction.
    pub fn new(policy: Arc<dyn Policy>, ctx: TransactionContext) -> Self {
        Self {
            policy,
            assembler: ChunkAssembler::new(),
            ctx,
        }
    }

    /// The transaction context, for wiring egress before streaming.
    pub fn context_mut(&mut self) -> &mut TransactionContext {
        &mut self.ctx
    }

    /// Folds one chunk into block state and runs the matching hooks.
    pub async fn process_chunk(&mut self, chunk: ChatCompletionChunk) -> Result<ChunkOutcome, StreamError> {
        let folded = self.assembler.fold(chunk);
        let state = self.assembler.state();

        let mut hook_error: Option<PolicyError> = None;

        // on_chunk_received always runs first.
        let result = self
            .policy
            .on_chunk_received(&mut StreamingContext {
                chunk: Some(&folded.chunk),
                state,
                inner: &mut self.ctx,
            })
            .await;
        collect_error(&mut hook_error, result);

        // A block that closed on this chunk fires its completion hook
        // before the hooks for the deltas that opened its successor.
        if hook_error.is_none()
            && let Some(block) = state.just_completed_block()
        {
            let completion = match block {
                StreamBlock::Content(_) => {
                    self.policy
                        .on_content_complete(&mut StreamingContext {
                            chunk: Some(&folded.chunk),
                            state,
                            inner: &mut self.ctx,
                        })
                        .await
                }
                StreamBlock::ToolCall(tool) => {
                    // Invariant: completed arguments must parse as JSON.
                    // Unparseable input is forwarded verbatim, with a
                    // structured error event for the audit trail.
                    if !tool.arguments.is_empty()
                        && serde_json::from_str::<serde_json::Value>(&tool.arguments).is_err()
                    {
                        self.ctx.emit_event(
                            "tool_call.arguments_unparseable",
                            "Completed tool call arguments are not valid JSON",
                            Severity::Error,
                            json_details(json!({
                                "tool_id": tool.id,
                                "tool_name": tool.name,
                                "arguments": tool.arguments,
                            })),
                        );
                    }

                    self.policy
                        .on_tool_call_complete(&mut StreamingContext {
                            chunk: Some(&folded.chunk),
                            state,
                            inner: &mut self.ctx,
                        })
                        .await
                }
            };
            collect_error(&mut hook_error, completion);
        }

        if hook_error.is_none() && folded.had_content {
            let result = self
                .policy
                .on_content_delta(&mut StreamingContext {
                    chunk: Some(&folded.chunk),
                    state,
                    inner: &mut self.ctx,
                })
                .await;
            collect_error(&mut hook_error, result);
        }

        if hook_error.is_none() && folded.had_tool_calls {
            let result = self
                .policy
                .on_tool_call_delta(&mut StreamingContext {
                    chunk: Some(&folded.chunk),
                    state,
                    inner: &mut self.ctx,
                })
                .await;
            collect_error(&mut hook_error, result);
        }

        if hook_error.is_none() && folded.finished {
            let result = self
                .policy
                .on_finish_reason(&mut StreamingContext {
                    chunk: Some(&folded.chunk),
                    state,
                    inner: &mut self.ctx,
                })
                .await;
            collect_error(&mut hook_error, result);
        }

        self.assembler.clear_just_completed();

        if let Some(error) = hook_error {
            self.ctx.emit_event(
                "policy.hook_error",
                &format!("Policy hook failed: {error}"),
                Severity::Error,
                serde_json::Map::new(),
            );
            return Err(StreamError::Policy(error.message));
        }

        Ok(if folded.finished {
            ChunkOutcome::Finished
        } else {
            ChunkOutcome::Continue
        })
    }

    /// Runs `on_stream_complete` after the last chunk.
    pub async fn finish(&mut self) -> Result<(), StreamError> {
        let result = {
            let state = self.assembler.state();
            self.policy
                .on_stream_complete(&mut StreamingContext {
                    chunk: None,
                    state,
                    inner: &mut self.ctx,
                })
                .await
        };

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.ctx.emit_event(
                    "policy.hook_error",
                    &format!("on_stream_complete failed: {error}"),
                    Severity::Error,
                    serde_json::Map::new(),
                );
                Err(StreamError::Policy(error.message))
            }
        }
    }

    /// Closes the egress queue and runs `on_streaming_policy_complete`.
    ///
    /// Runs on every terminal path, exactly once per transaction, so the
    /// policy always sees a clean tear-down. Errors here are logged but
    /// do not change the stream outcome: the stream is already over.
    pub async fn complete(&mut self) {
        self.ctx.close_egress();

        let result = {
            let state = self.assembler.state();
            self.policy
                .on_streaming_policy_complete(&mut StreamingContext {
                    chunk: None,
                    state,
                    inner: &mut self.ctx,
                })
                .await
        };

        if let Err(error) = result {
            log::warn!("on_streaming_policy_complete failed: {error}");
            self.ctx.emit_event(
                "policy.hook_error",
                &format!("on_streaming_policy_complete failed: {error}"),
                Severity::Error,
                serde_json::Map::new(),
            );
        }
    }
}

fn collect_error(slot: &mut Option<PolicyError>, result: Result<(), PolicyError>) {
    if slot.is_none()
        && let Err(error) = result
    {
        *slot = Some(error);
    }
}

fn json_details(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyContext;
    use crate::recorder::TransactionRecorder;
    use crate::transaction::{ClientFormat, Transaction};
    use async_trait::async_trait;
    use llm::messages::openai::{ChatCompletionChunk, FinishReason, FunctionCallDelta, ToolCallDelta};
    use observability::EventEmitter;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct HookCounter {
        chunk_received: AtomicUsize,
        content_delta: AtomicUsize,
        content_complete: AtomicUsize,
        tool_call_delta: AtomicUsize,
        tool_call_complete: AtomicUsize,
        finish_reason: AtomicUsize,
        order: Mutex<Vec<&'static str>>,
    }

    struct CountingPolicy(Arc<HookCounter>);

    impl CountingPolicy {
        fn mark(&self, name: &'static str, counter: &AtomicUsize) {
            counter.fetch_add(1, Ordering::SeqCst);
            self.0.order.lock().unwrap().push(name);
        }
    }

    #[async_trait]
    impl Policy for CountingPolicy {
        async fn on_chunk_received(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("chunk_received", &self.0.chunk_received);
            Ok(())
        }

        async fn on_content_delta(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("content_delta", &self.0.content_delta);
            Ok(())
        }

        async fn on_content_complete(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("content_complete", &self.0.content_complete);
            Ok(())
        }

        async fn on_tool_call_delta(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("tool_call_delta", &self.0.tool_call_delta);
            Ok(())
        }

        async fn on_tool_call_complete(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("tool_call_complete", &self.0.tool_call_complete);
            Ok(())
        }

        async fn on_finish_reason(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            self.mark("finish_reason", &self.0.finish_reason);
            Ok(())
        }
    }

    fn executor_with(policy: Arc<dyn Policy>) -> PolicyExecutor {
        let transaction = Transaction::new(ClientFormat::OpenAi, "gpt-4", None);
        let emitter = EventEmitter::disabled();
        let recorder = Arc::new(TransactionRecorder::new(transaction.id.clone(), emitter.clone()));
        PolicyExecutor::new(policy, TransactionContext::new(transaction, emitter, recorder))
    }

    fn content(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk::content("chatcmpl-1", "gpt-4", text)
    }

    fn tool_fragment(index: u32, id: Option<&str>, arguments: Option<&str>) -> ChatCompletionChunk {
        let mut chunk = content("");
        chunk.choices[0].delta.content = None;
        chunk.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index,
            id: id.map(str::to_string),
            r#type: None,
            function: Some(FunctionCallDelta {
                name: id.map(|_| "search".to_string()),
                arguments: arguments.map(str::to_string),
            }),
        }]);
        chunk
    }

    #[tokio::test]
    async fn hooks_fire_in_documented_order() {
        let counter = Arc::new(HookCounter::default());
        let mut executor = executor_with(Arc::new(CountingPolicy(counter.clone())));

        executor.process_chunk(content("Hello")).await.unwrap();
        executor.process_chunk(tool_fragment(0, Some("call_1"), None)).await.unwrap();
        executor
            .process_chunk(tool_fragment(0, None, Some("{}")))
            .await
            .unwrap();
        let outcome = executor
            .process_chunk(ChatCompletionChunk::finish("chatcmpl-1", "gpt-4", FinishReason::ToolCalls))
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome::Finished);
        assert_eq!(counter.chunk_received.load(Ordering::SeqCst), 4);
        assert_eq!(counter.content_delta.load(Ordering::SeqCst), 1);
        assert_eq!(counter.content_complete.load(Ordering::SeqCst), 1);
        assert_eq!(counter.tool_call_delta.load(Ordering::SeqCst), 2);
        assert_eq!(counter.tool_call_complete.load(Ordering::SeqCst), 1);
        assert_eq!(counter.finish_reason.load(Ordering::SeqCst), 1);

        let order = counter.order.lock().unwrap().clone();
        assert_eq!(
            order,
            [
                // "Hello"
                "chunk_received",
                "content_delta",
                // tool call start closes the content block first
                "chunk_received",
                "content_complete",
                "tool_call_delta",
                // arguments fragment
                "chunk_received",
                "tool_call_delta",
                // finish closes the tool block before on_finish_reason
                "chunk_received",
                "tool_call_complete",
                "finish_reason",
            ]
        );
    }

    struct FailingPolicy;

    #[async_trait]
    impl Policy for FailingPolicy {
        async fn on_content_delta(&self, _ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            Err(PolicyError::new("boom"))
        }
    }

    #[tokio::test]
    async fn hook_error_aborts_the_stream() {
        let mut executor = executor_with(Arc::new(FailingPolicy));

        let error = executor.process_chunk(content("x")).await.unwrap_err();
        assert!(matches!(error, StreamError::Policy(message) if message == "boom"));
    }

    struct ScratchpadPolicy;

    #[async_trait]
    impl Policy for ScratchpadPolicy {
        async fn on_request(
            &self,
            request: llm::messages::openai::ChatCompletionRequest,
            ctx: &mut PolicyContext<'_>,
        ) -> Result<llm::messages::openai::ChatCompletionRequest, crate::error::PolicyRejection> {
            ctx.scratchpad()
                .insert("seen_model".to_string(), serde_json::json!(request.model));
            Ok(request)
        }

        async fn on_content_delta(&self, ctx: &mut StreamingContext<'_>) -> Result<(), PolicyError> {
            assert_eq!(
                ctx.scratchpad().get("seen_model"),
                Some(&serde_json::json!("gpt-4"))
            );
            Ok(())
        }
    }

    #[tokio::test]
    async fn scratchpad_persists_from_request_to_streaming() {
        let policy = Arc::new(ScratchpadPolicy);
        let mut executor = executor_with(policy.clone());

        let request: llm::messages::openai::ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let mut ctx = PolicyContext {
            inner: executor.context_mut(),
        };
        policy.on_request(request, &mut ctx).await.unwrap();

        executor.process_chunk(content("hello")).await.unwrap();
    }
}
