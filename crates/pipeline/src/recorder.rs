//! Transaction recorder: paired ingress/egress capture and
//! reconstruction of canonical responses from chunk buffers.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use llm::messages::openai::{
    ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatMessage, ChatRole, FinishReason, FunctionCall,
    MessageContent, ObjectType, ToolCall, ToolType, Usage,
};
use observability::{EventEmitter, GenericRecord, Record};
use serde_json::json;

/// Reconstructs one synthetic non-streaming response from a chunk buffer.
///
/// Content deltas concatenate into the body; tool-call fragments fold by
/// index; the last finish reason wins. A buffer that never carried a
/// finish reason gets `stop` synthesized here, and only here; the live
/// stream does not invent one.
pub fn reconstruct(chunks: &[ChatCompletionChunk]) -> ChatCompletionResponse {
    let mut id = String::new();
    let mut model = String::new();
    let mut content = String::new();
    let mut created = 0;
    let mut usage: Option<Usage> = None;
    let mut finish_reason: Option<FinishReason> = None;

    struct ToolAccumulator {
        id: Option<String>,
        name: String,
        arguments: String,
    }

    let mut tools: BTreeMap<u32, ToolAccumulator> = BTreeMap::new();

    for chunk in chunks {
        if id.is_empty() && !chunk.id.is_empty() {
            id = chunk.id.clone();
        }
        if model.is_empty() && !chunk.model.is_empty() {
            model = chunk.model.clone();
        }
        if created == 0 {
            created = chunk.created;
        }
        if let Some(chunk_usage) = chunk.usage {
            usage = Some(chunk_usage);
        }

        let Some(choice) = chunk.choices.first() else {
            continue;
        };

        if let Some(delta) = &choice.delta.content {
            content.push_str(delta);
        }

        for fragment in choice.delta.tool_calls.iter().flatten() {
            let accumulator = fragment
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .map(|new_id| (fragment.index, new_id));

            let entry = tools.entry(fragment.index).or_insert_with(|| ToolAccumulator {
                id: None,
                name: String::new(),
                arguments: String::new(),
            });

            if let Some((_, new_id)) = accumulator {
                entry.id = Some(new_id);
            }

            if let Some(function) = &fragment.function {
                if let Some(name) = function.name.as_ref().filter(|name| !name.is_empty()) {
                    entry.name = name.clone();
                }
                if let Some(arguments) = &function.arguments {
                    entry.arguments.push_str(arguments);
                }
            }
        }

        if let Some(reason) = &choice.finish_reason {
            finish_reason = Some(reason.clone());
        }
    }

    let tool_calls: Vec<ToolCall> = tools
        .into_iter()
        .map(|(index, accumulator)| ToolCall {
            id: accumulator.id.unwrap_or_else(|| format!("tool_{index}")),
            r#type: ToolType::Function,
            function: FunctionCall {
                name: accumulator.name,
                arguments: accumulator.arguments,
            },
        })
        .collect();

    ChatCompletionResponse {
        id,
        object: ObjectType::ChatCompletion,
        created,
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: ChatRole::Assistant,
                content: Some(MessageContent::Text(content)),
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason.unwrap_or(FinishReason::Stop)),
        }],
        usage,
    }
}

/// Buffers the ingress and egress chunk streams of one transaction and
/// emits a paired record at stream end so the original and final
/// responses can be diffed.
pub struct TransactionRecorder {
    transaction_id: String,
    emitter: EventEmitter,
    ingress: Mutex<Vec<ChatCompletionChunk>>,
    egress: Mutex<Vec<ChatCompletionChunk>>,
    finalized: AtomicBool,
}

impl TransactionRecorder {
    /// Creates a recorder for one transaction.
    pub fn new(transaction_id: impl Into<String>, emitter: EventEmitter) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            emitter,
            ingress: Mutex::new(Vec::new()),
            egress: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }

    /// Buffers one pre-policy chunk from the upstream.
    pub fn add_ingress_chunk(&self, chunk: &ChatCompletionChunk) {
        if let Ok(mut ingress) = self.ingress.lock() {
            ingress.push(chunk.clone());
        }
    }

    /// Buffers one post-policy chunk headed to the client.
    pub fn add_egress_chunk(&self, chunk: &ChatCompletionChunk) {
        if let Ok(mut egress) = self.egress.lock() {
            egress.push(chunk.clone());
        }
    }

    /// Number of ingress chunks observed so far.
    pub fn ingress_len(&self) -> usize {
        self.ingress.lock().map(|chunks| chunks.len()).unwrap_or(0)
    }

    /// Reconstructs and emits the paired record. Idempotent: the second
    /// and later calls are no-ops.
    pub async fn finalize_streaming(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let (original, ingress_count) = {
            let ingress = self.ingress.lock().map(|chunks| chunks.clone()).unwrap_or_default();
            (reconstruct(&ingress), ingress.len())
        };
        let (fin, egress_count) = {
            let egress = self.egress.lock().map(|chunks| chunks.clone()).unwrap_or_default();
            (reconstruct(&egress), egress.len())
        };

        self.emitter
            .record_flushed(Record::Generic(GenericRecord::new(
                self.transaction_id.clone(),
                "transaction.streaming_response_recorded",
                json!({
                    "ingress_chunks": ingress_count,
                    "egress_chunks": egress_count,
                    "original_response": original,
                    "final_response": fin,
                }),
            )))
            .await;
    }

    /// Emits the paired record for the non-streaming path. Idempotent.
    pub async fn finalize_non_streaming(&self, original: &ChatCompletionResponse, fin: &ChatCompletionResponse) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        self.emitter
            .record_flushed(Record::Generic(GenericRecord::new(
                self.transaction_id.clone(),
                "transaction.response_recorded",
                json!({
                    "original_response": original,
                    "final_response": fin,
                }),
            )))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::messages::openai::{FinishReason, FunctionCallDelta, ToolCallDelta};
    use observability::{EventStore, MemoryEventStore};
    use std::sync::Arc;

    fn content(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk::content("chatcmpl-1", "gpt-4", text)
    }

    #[test]
    fn reconstruct_concatenates_content() {
        let chunks = vec![
            content("Hello"),
            content(" "),
            content("world"),
            ChatCompletionChunk::finish("chatcmpl-1", "gpt-4", FinishReason::Stop),
        ];

        let response = reconstruct(&chunks);

        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.model, "gpt-4");
        assert_eq!(
            response.choices[0].message.content_text().as_deref(),
            Some("Hello world")
        );
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn reconstruct_folds_tool_fragments_by_index() {
        let mut start = content("");
        start.choices[0].delta.content = None;
        start.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            r#type: None,
            function: Some(FunctionCallDelta {
                name: Some("get_weather".into()),
                arguments: Some(String::new()),
            }),
        }]);

        let mut frag = content("");
        frag.choices[0].delta.content = None;
        frag.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index: 0,
            id: None,
            r#type: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some("{\"loc\":\"NYC\"}".into()),
            }),
        }]);

        let chunks = vec![
            start,
            frag,
            ChatCompletionChunk::finish("chatcmpl-1", "gpt-4", FinishReason::ToolCalls),
        ];

        let response = reconstruct(&chunks);
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"loc\":\"NYC\"}");
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn reconstruct_synthesizes_stop_when_absent() {
        let response = reconstruct(&[content("truncated")]);
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn reconstruct_of_finish_only_stream_is_empty_content() {
        let response = reconstruct(&[ChatCompletionChunk::finish("c", "m", FinishReason::Stop)]);
        assert_eq!(response.choices[0].message.content_text().as_deref(), Some(""));
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let store = Arc::new(MemoryEventStore::new());
        let emitter = EventEmitter::new(vec![Arc::new(observability::sinks::store::StoreSink::new(store.clone()))]);

        let recorder = TransactionRecorder::new("tx-1", emitter);
        recorder.add_ingress_chunk(&content("hi"));
        recorder.add_egress_chunk(&content("HI"));

        recorder.finalize_streaming().await;
        recorder.finalize_streaming().await;

        let rows = store.read("tx-1").await.unwrap();
        assert_eq!(rows.len(), 1);

        let Record::Generic(record) = &rows[0].record else {
            unreachable!("expected generic record");
        };
        assert_eq!(record.data["ingress_chunks"], 1);
        assert_eq!(record.data["egress_chunks"], 1);
        assert_eq!(
            record.data["original_response"]["choices"][0]["message"]["content"],
            "hi"
        );
        assert_eq!(record.data["final_response"]["choices"][0]["message"]["content"], "HI");
    }
}
