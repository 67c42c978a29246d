//! Client formatters: re-serialize the post-policy chunk stream into the
//! wire format the client requested.
//!
//! OpenAI clients get one `data:` frame per chunk and a terminating
//! `data: [DONE]`. Anthropic clients get the full lifecycle: one
//! `message_start`, block events with sequential indices from the
//! [`llm::sse::EventAssembler`], and a final `message_stop`. Frames are
//! yielded one at a time and never batched.

use std::collections::VecDeque;

use futures::Stream;
use llm::messages::anthropic;
use llm::sse::EventAssembler;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use llm::messages::openai::ChatCompletionChunk;

use crate::transaction::{ClientFormat, Transaction};

/// One Server-Sent-Events frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// Event name line; Anthropic frames carry one, OpenAI frames do not.
    pub event: Option<&'static str>,
    /// The data line.
    pub data: String,
}

impl SseFrame {
    fn data_only(data: String) -> Self {
        Self { event: None, data }
    }
}

fn serialize<T: serde::Serialize>(value: &T) -> String {
    sonic_rs::to_string(value).unwrap_or_else(|e| {
        log::error!("Failed to serialize SSE payload: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}

fn event_frame(event: &anthropic::StreamEvent) -> SseFrame {
    SseFrame {
        event: Some(event.name()),
        data: serialize(event),
    }
}

enum Phase {
    Start,
    Pump,
    Terminal,
    Done,
}

struct FormatterState {
    // Declared before the receiver so a dropped stream cancels the
    // transaction before the egress queue closes.
    _guard: Option<DropGuard>,
    format: ClientFormat,
    message_id: String,
    model: String,
    egress: mpsc::Receiver<ChatCompletionChunk>,
    assembler: EventAssembler,
    pending: VecDeque<SseFrame>,
    phase: Phase,
}

/// Turns the egress queue into a stream of SSE frames in the client's
/// requested wire format.
///
/// The optional guard is dropped with the stream, propagating a client
/// disconnect into the orchestrator's cancellation token.
pub fn sse_frames(
    transaction: &Transaction,
    egress: mpsc::Receiver<ChatCompletionChunk>,
    guard: Option<DropGuard>,
) -> impl Stream<Item = SseFrame> + Send + use<> {
    let state = FormatterState {
        _guard: guard,
        format: transaction.client_format,
        message_id: format!("msg_{}", transaction.id),
        model: transaction.model.clone(),
        egress,
        assembler: EventAssembler::new(),
        pending: VecDeque::new(),
        phase: Phase::Start,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }

            match state.phase {
                Phase::Start => {
                    state.phase = Phase::Pump;

                    if state.format == ClientFormat::Anthropic {
                        let start = anthropic::StreamEvent::MessageStart {
                            message: anthropic::StreamMessageStart {
                                id: state.message_id.clone(),
                                r#type: "message".to_string(),
                                role: anthropic::Role::Assistant,
                                content: Vec::new(),
                                model: state.model.clone(),
                                usage: anthropic::UsageInfo::default(),
                            },
                        };
                        return Some((event_frame(&start), state));
                    }
                }

                Phase::Pump => match state.egress.recv().await {
                    Some(chunk) => match state.format {
                        ClientFormat::OpenAi => {
                            return Some((SseFrame::data_only(serialize(&chunk)), state));
                        }
                        ClientFormat::Anthropic => {
                            for event in state.assembler.process_chunk(&chunk) {
                                state.pending.push_back(event_frame(&event));
                            }
                        }
                    },
                    None => {
                        state.phase = Phase::Terminal;
                    }
                },

                Phase::Terminal => {
                    state.phase = Phase::Done;

                    match state.format {
                        ClientFormat::OpenAi => {
                            return Some((SseFrame::data_only("[DONE]".to_string()), state));
                        }
                        ClientFormat::Anthropic => {
                            for event in state.assembler.finish() {
                                state.pending.push_back(event_frame(&event));
                            }
                            state.pending.push_back(event_frame(&anthropic::StreamEvent::MessageStop));
                        }
                    }
                }

                Phase::Done => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{ClientFormat, Transaction};
    use futures::StreamExt;
    use llm::messages::openai::{ChatCompletionChunk, FinishReason};

    fn transaction(format: ClientFormat) -> Transaction {
        let mut transaction = Transaction::new(format, "gpt-4", None);
        transaction.id = "tx-test".to_string();
        transaction
    }

    #[tokio::test]
    async fn openai_frames_end_with_done() {
        let (tx, rx) = mpsc::channel(8);
        let frames = sse_frames(&transaction(ClientFormat::OpenAi), rx, None);

        tx.send(ChatCompletionChunk::content("c", "gpt-4", "Hello")).await.unwrap();
        tx.send(ChatCompletionChunk::finish("c", "gpt-4", FinishReason::Stop))
            .await
            .unwrap();
        drop(tx);

        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.event.is_none()));
        assert!(frames[0].data.contains("\"content\":\"Hello\""));
        assert!(frames[1].data.contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[2].data, "[DONE]");
    }

    #[tokio::test]
    async fn anthropic_frames_wrap_blocks_in_message_lifecycle() {
        let (tx, rx) = mpsc::channel(8);
        let frames = sse_frames(&transaction(ClientFormat::Anthropic), rx, None);

        tx.send(ChatCompletionChunk::content("c", "gpt-4", "Hi")).await.unwrap();
        tx.send(ChatCompletionChunk::finish("c", "gpt-4", FinishReason::Stop))
            .await
            .unwrap();
        drop(tx);

        let frames: Vec<SseFrame> = frames.collect().await;
        let names: Vec<&str> = frames.iter().map(|frame| frame.event.unwrap()).collect();

        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );

        assert!(frames[0].data.contains("\"id\":\"msg_tx-test\""));
    }

    #[tokio::test]
    async fn anthropic_stream_without_finish_still_closes_blocks() {
        let (tx, rx) = mpsc::channel(8);
        let frames = sse_frames(&transaction(ClientFormat::Anthropic), rx, None);

        tx.send(ChatCompletionChunk::content("c", "gpt-4", "partial")).await.unwrap();
        drop(tx);

        let frames: Vec<SseFrame> = frames.collect().await;
        let names: Vec<&str> = frames.iter().map(|frame| frame.event.unwrap()).collect();

        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_stop"
            ]
        );
    }
}
