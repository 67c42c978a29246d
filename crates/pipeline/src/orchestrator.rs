//! Streaming orchestrator: binds the upstream source, the policy
//! executor, and the egress queue into one concurrent arrangement with
//! bounded liveness.
//!
//! Topology for a single transaction:
//!
//! ```text
//!   upstream ──► [forward task] ──► orchestrator loop ──► egress queue
//!                                        │
//!                             deadline monitor + cancellation
//! ```
//!
//! The deadline monitor is keepalive-reset: receipt of an upstream chunk,
//! an egress push, or an explicit policy keepalive each push the deadline
//! out by the configured timeout. If it elapses untouched, the stream
//! fails with a timeout distinct from a connection error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use llm::messages::openai::ChatCompletionChunk;
use llm::upstream::ChatStream;
use observability::{EventEmitter, PipelineStage, PolicyEvent, Severity};
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::control::{CONTROL_CHANNEL_CAPACITY, ControlMessage};
use crate::error::StreamError;
use crate::executor::{ChunkOutcome, PolicyExecutor};
use crate::policy::{Policy, TransactionContext};
use crate::recorder::TransactionRecorder;
use crate::transaction::Transaction;

/// Capacity of the bounded egress queue between policy and client.
pub(crate) const EGRESS_CHANNEL_CAPACITY: usize = 64;

struct DeadlineInner {
    deadline: Mutex<Instant>,
    updated: Notify,
    timeout: Duration,
}

/// Shared handle that resets the inactivity deadline.
#[derive(Clone)]
pub struct DeadlineHandle {
    inner: Arc<DeadlineInner>,
}

impl DeadlineHandle {
    /// Resets the deadline to now + timeout and wakes the monitor.
    pub fn keepalive(&self) {
        if let Ok(mut deadline) = self.inner.deadline.lock() {
            *deadline = Instant::now() + self.inner.timeout;
        }
        self.inner.updated.notify_one();
    }
}

/// Deadline-based inactivity monitor.
///
/// Sleeps until the deadline; keepalive calls reset the deadline and wake
/// the monitor to sleep again, minimizing wake-ups compared to polling.
pub struct DeadlineMonitor {
    inner: Arc<DeadlineInner>,
}

impl DeadlineMonitor {
    /// Creates a monitor whose first deadline is now + timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DeadlineInner {
                deadline: Mutex::new(Instant::now() + timeout),
                updated: Notify::new(),
                timeout,
            }),
        }
    }

    /// A cloneable handle that resets the deadline.
    pub fn handle(&self) -> DeadlineHandle {
        DeadlineHandle {
            inner: self.inner.clone(),
        }
    }

    /// Resets the deadline.
    pub fn keepalive(&self) {
        self.handle().keepalive();
    }

    fn timeout_secs(&self) -> f64 {
        self.inner.timeout.as_secs_f64()
    }

    /// Resolves when the deadline elapses without a keepalive.
    pub async fn expired(&self) {
        loop {
            let deadline = match self.inner.deadline.lock() {
                Ok(deadline) => *deadline,
                Err(_) => return,
            };

            if Instant::now() >= deadline {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = self.inner.updated.notified() => {}
            }
        }
    }
}

/// Terminal state of a streaming transaction.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream ended normally (or the client went away).
    Ended,
    /// The stream failed; the error names the kind.
    Failed(StreamError),
}

/// Orchestrates one streaming transaction.
pub struct StreamOrchestrator {
    transaction_id: String,
    control_rx: mpsc::Receiver<ControlMessage>,
    forward: JoinHandle<()>,
    executor: PolicyExecutor,
    monitor: DeadlineMonitor,
    cancel: CancellationToken,
    recorder: Arc<TransactionRecorder>,
    emitter: EventEmitter,
}

impl StreamOrchestrator {
    /// Creates the orchestrator and spawns the forward task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: String,
        upstream: ChatStream,
        executor: PolicyExecutor,
        monitor: DeadlineMonitor,
        cancel: CancellationToken,
        recorder: Arc<TransactionRecorder>,
        emitter: EventEmitter,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let forward = tokio::spawn(forward_upstream(upstream, control_tx));

        Self {
            transaction_id,
            control_rx,
            forward,
            executor,
            monitor,
            cancel,
            recorder,
            emitter,
        }
    }

    /// Runs the stream to a terminal state and tears everything down.
    ///
    /// On every exit path the forward task is stopped, the egress queue
    /// is closed, `on_streaming_policy_complete` runs exactly once, and
    /// the transaction recorder finalizes.
    pub async fn run(mut self) -> StreamOutcome {
        let outcome = self.run_inner().await;

        // Stops the forward task wherever it is suspended; dropping it
        // also drops the upstream iterator, a best-effort close.
        self.forward.abort();

        if let StreamOutcome::Failed(error) = &outcome {
            log::error!("stream[{}] failed: {error}", self.transaction_id);
            self.emitter.policy_event(PolicyEvent::new(
                self.transaction_id.clone(),
                None,
                format!("stream.{}", error.kind()),
                format!("Stream failed: {error}"),
                Severity::Error,
                serde_json::Map::new(),
            ));
        }

        self.executor.complete().await;
        self.recorder.finalize_streaming().await;

        self.emitter.pipeline(
            PipelineStage::StreamEnded,
            &self.transaction_id,
            None,
            json!({
                "outcome": match &outcome {
                    StreamOutcome::Ended => "ended",
                    StreamOutcome::Failed(error) => error.kind(),
                },
            }),
        );

        outcome
    }

    async fn run_inner(&mut self) -> StreamOutcome {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    log::debug!("stream[{}] client disconnected", self.transaction_id);
                    return StreamOutcome::Ended;
                }

                _ = self.monitor.expired() => {
                    return StreamOutcome::Failed(StreamError::Timeout(self.monitor.timeout_secs()));
                }

                message = self.control_rx.recv() => match message {
                    None | Some(ControlMessage::End) => {
                        if let Err(error) = self.executor.finish().await {
                            return StreamOutcome::Failed(error);
                        }
                        return StreamOutcome::Ended;
                    }

                    Some(ControlMessage::Chunk(chunk)) => {
                        match self.handle_chunk(*chunk).await {
                            Ok(ChunkOutcome::Continue) => {}
                            Ok(ChunkOutcome::Finished) => {
                                if let Err(error) = self.executor.finish().await {
                                    return StreamOutcome::Failed(error);
                                }
                                return StreamOutcome::Ended;
                            }
                            Err(error) => {
                                // A push that failed because the client
                                // went away is a disconnect, not a
                                // policy failure.
                                if self.cancel.is_cancelled() {
                                    log::debug!("stream[{}] client disconnected mid-push", self.transaction_id);
                                    return StreamOutcome::Ended;
                                }
                                return StreamOutcome::Failed(error);
                            }
                        }
                    }

                    Some(ControlMessage::Keepalive) => {
                        log::debug!("stream[{}] received keepalive", self.transaction_id);
                        self.monitor.keepalive();
                    }

                    Some(ControlMessage::Error(reason)) => {
                        return StreamOutcome::Failed(StreamError::Connection(reason));
                    }
                }
            }
        }
    }

    async fn handle_chunk(&mut self, chunk: ChatCompletionChunk) -> Result<ChunkOutcome, StreamError> {
        self.monitor.keepalive();
        self.recorder.add_ingress_chunk(&chunk);

        self.emitter.pipeline(
            PipelineStage::UpstreamChunkReceived,
            &self.transaction_id,
            None,
            serde_json::to_value(&chunk).unwrap_or(serde_json::Value::Null),
        );

        self.executor.process_chunk(chunk).await
    }
}

async fn forward_upstream(mut upstream: ChatStream, control_tx: mpsc::Sender<ControlMessage>) {
    while let Some(item) = upstream.next().await {
        let message = match item {
            Ok(chunk) => ControlMessage::Chunk(Box::new(chunk)),
            Err(error) => {
                let _ = control_tx.send(ControlMessage::Error(error.to_string())).await;
                return;
            }
        };

        // A dropped receiver means the orchestrator is gone; stop
        // pulling from the upstream.
        if control_tx.send(message).await.is_err() {
            return;
        }
    }

    let _ = control_tx.send(ControlMessage::End).await;
}

/// A running streaming transaction.
pub struct StreamSession {
    /// Post-policy chunks for the client formatter to drain.
    pub egress: mpsc::Receiver<ChatCompletionChunk>,
    /// Cancel to propagate a client disconnect.
    pub cancel: CancellationToken,
    /// Resolves to the terminal state.
    pub handle: JoinHandle<StreamOutcome>,
    /// The recorder, for callers that want the buffers.
    pub recorder: Arc<TransactionRecorder>,
}

/// Wires up and spawns the full pipeline for one streaming transaction.
pub fn start_stream(
    policy: Arc<dyn Policy>,
    transaction: &Transaction,
    upstream: ChatStream,
    timeout: Duration,
    emitter: EventEmitter,
) -> StreamSession {
    let recorder = Arc::new(TransactionRecorder::new(transaction.id.clone(), emitter.clone()));
    let ctx = TransactionContext::new(transaction.clone(), emitter.clone(), recorder.clone());

    start_stream_with_context(policy, upstream, timeout, ctx, recorder, emitter)
}

/// Like [`start_stream`], but with a pre-built context so scratchpad
/// state written by `on_request` carries into the streaming hooks.
pub fn start_stream_with_context(
    policy: Arc<dyn Policy>,
    upstream: ChatStream,
    timeout: Duration,
    mut ctx: TransactionContext,
    recorder: Arc<TransactionRecorder>,
    emitter: EventEmitter,
) -> StreamSession {
    let transaction_id = ctx.transaction().id.clone();

    let (egress_tx, egress_rx) = mpsc::channel(EGRESS_CHANNEL_CAPACITY);
    let monitor = DeadlineMonitor::new(timeout);
    let cancel = CancellationToken::new();

    ctx.connect_egress(egress_tx, monitor.handle());

    let executor = PolicyExecutor::new(policy, ctx);

    let orchestrator = StreamOrchestrator::new(
        transaction_id,
        upstream,
        executor,
        monitor,
        cancel.clone(),
        recorder.clone(),
        emitter,
    );

    let handle = tokio::spawn(orchestrator.run());

    StreamSession {
        egress: egress_rx,
        cancel,
        handle,
        recorder,
    }
}
