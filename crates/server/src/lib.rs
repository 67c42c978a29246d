//! HTTP surface of the Warden proxy.
//!
//! Two endpoints, one per supported wire protocol:
//!
//! - `POST /v1/chat/completions` for OpenAI chat completions
//! - `POST /v1/messages` for Anthropic messages
//!
//! Both support streaming (SSE) and non-streaming responses. Either way
//! the request is validated at the boundary, canonicalized, passed
//! through the active policy, and dispatched to the configured upstream;
//! streaming responses run through the full policy pipeline.

mod error;
pub mod logger;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use futures::StreamExt;
use llm::messages::{anthropic, openai};
use llm::upstream::Upstream;
use observability::{EventEmitter, EventStore, MemoryEventStore, PipelineStage, PolicyEvent, Severity};
use observability::request_log::RequestLogRecorder;
use pipeline::{
    ClientFormat, Policy, Transaction, TransactionContext, TransactionRecorder, sse_frames, start_stream_with_context,
};
use policies::PolicyHandle;

pub use error::{AnthropicApiError, AnthropicResult, ApiError, ApiResult};

/// Shared server state.
pub struct AppState {
    /// Loaded configuration.
    pub config: config::Config,
    /// The upstream LLM client.
    pub upstream: Arc<dyn Upstream>,
    /// Hot-swappable active policy.
    pub policy: Arc<PolicyHandle>,
    /// Observability fanout.
    pub emitter: EventEmitter,
    /// Durable record store.
    pub store: Arc<dyn EventStore>,
}

/// Builds the shared state from configuration.
pub async fn build_state(config: config::Config) -> anyhow::Result<Arc<AppState>> {
    let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
    let emitter = EventEmitter::from_config(&config.observability, store.clone()).await;

    let upstream = llm::upstream::from_config(&config.upstream)
        .map_err(|e| anyhow::anyhow!("failed to initialize upstream client: {e}"))?;

    if config.policy.source == config::PolicySource::Database {
        log::warn!("policy.source = \"database\": expecting the control plane to swap the policy after startup");
    }

    let policy = policies::build(&config.policy).map_err(|e| anyhow::anyhow!("failed to build policy: {e}"))?;
    log::info!("active policy: {}", config.policy.name);

    Ok(Arc::new(AppState {
        config,
        upstream,
        policy: Arc::new(PolicyHandle::new(policy)),
        emitter,
        store,
    }))
}

/// Creates the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds and serves until ctrl-c.
pub async fn serve(config: config::Config) -> anyhow::Result<()> {
    let address = config.server.listen_address_or_default();
    let state = build_state(config).await?;

    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("listening on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Handle OpenAI chat completion requests.
///
/// Streaming requests return SSE frames terminated by `data: [DONE]`;
/// non-streaming requests return a single JSON body.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> ApiResult<Response> {
    log::debug!("chat completions called for model: {}", request.model);

    validate_request(&state, &request.model, request.messages.len())?;

    let transaction = Transaction::new(ClientFormat::OpenAi, &request.model, trace_id(&headers));
    let streaming = request.stream.unwrap_or(false);

    let parts = TransactionParts::new(&state, &transaction, &headers, &request);
    let (policy, mut ctx, recorder) = (parts.policy, parts.ctx, parts.recorder);

    let final_request = apply_request_policy(&state, policy.as_ref(), &mut ctx, parts.request_log, request).await?;

    if streaming {
        return stream_response(&state, &transaction, policy, ctx, recorder, final_request).await;
    }

    let original = state.upstream.chat(final_request).await?;
    state.emitter.pipeline(
        PipelineStage::UpstreamResponseReceived,
        &transaction.id,
        transaction.trace_id.clone(),
        serde_json::to_value(&original).unwrap_or(serde_json::Value::Null),
    );

    let final_response = policy
        .on_response(original.clone(), &mut ctx.policy_context())
        .await
        .map_err(ApiError::from)?;

    recorder.finalize_non_streaming(&original, &final_response).await;
    state.emitter.pipeline(
        PipelineStage::ClientResponseSent,
        &transaction.id,
        transaction.trace_id.clone(),
        serde_json::to_value(&final_response).unwrap_or(serde_json::Value::Null),
    );

    Ok(Json(final_response).into_response())
}

/// Handle Anthropic messages requests.
async fn anthropic_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    log::debug!("anthropic messages called for model: {}", request.model);

    validate_request(&state, &request.model, request.messages.len()).map_err(AnthropicApiError)?;

    let transaction = Transaction::new(ClientFormat::Anthropic, &request.model, trace_id(&headers));
    let streaming = request.stream.unwrap_or(false);

    let canonical = openai::ChatCompletionRequest::from(request);

    let parts = TransactionParts::new(&state, &transaction, &headers, &canonical);
    let (policy, mut ctx, recorder) = (parts.policy, parts.ctx, parts.recorder);

    let final_request = apply_request_policy(&state, policy.as_ref(), &mut ctx, parts.request_log, canonical)
        .await
        .map_err(AnthropicApiError)?;

    if streaming {
        return stream_response(&state, &transaction, policy, ctx, recorder, final_request)
            .await
            .map_err(AnthropicApiError);
    }

    let original = state.upstream.chat(final_request).await.map_err(ApiError::from).map_err(AnthropicApiError)?;
    state.emitter.pipeline(
        PipelineStage::UpstreamResponseReceived,
        &transaction.id,
        transaction.trace_id.clone(),
        serde_json::to_value(&original).unwrap_or(serde_json::Value::Null),
    );

    let final_response = policy
        .on_response(original.clone(), &mut ctx.policy_context())
        .await
        .map_err(AnthropicApiError::from)?;

    recorder.finalize_non_streaming(&original, &final_response).await;
    state.emitter.pipeline(
        PipelineStage::ClientResponseSent,
        &transaction.id,
        transaction.trace_id.clone(),
        serde_json::to_value(&final_response).unwrap_or(serde_json::Value::Null),
    );

    Ok(Json(anthropic::MessagesResponse::from(final_response)).into_response())
}

struct TransactionParts {
    policy: Arc<dyn Policy>,
    ctx: TransactionContext,
    recorder: Arc<TransactionRecorder>,
    request_log: RequestLogRecorder,
}

impl TransactionParts {
    /// Captures the active policy and emits the arrival records.
    fn new(
        state: &AppState,
        transaction: &Transaction,
        headers: &HeaderMap,
        request: &openai::ChatCompletionRequest,
    ) -> Self {
        let request_payload = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);

        state.emitter.pipeline(
            PipelineStage::ClientRequestReceived,
            &transaction.id,
            transaction.trace_id.clone(),
            request_payload.clone(),
        );

        let mut request_log = RequestLogRecorder::new(state.emitter.clone(), &transaction.id);
        request_log.record_inbound("POST", endpoint(transaction.client_format), &header_map(headers), request_payload);

        let recorder = Arc::new(TransactionRecorder::new(transaction.id.clone(), state.emitter.clone()));
        let ctx = TransactionContext::new(transaction.clone(), state.emitter.clone(), recorder.clone());

        Self {
            policy: state.policy.current(),
            ctx,
            recorder,
            request_log,
        }
    }
}

/// Runs `on_request`, emits the upstream-dispatch record, and flushes
/// the redacted request envelope.
async fn apply_request_policy(
    state: &AppState,
    policy: &dyn Policy,
    ctx: &mut TransactionContext,
    mut request_log: RequestLogRecorder,
    request: openai::ChatCompletionRequest,
) -> ApiResult<openai::ChatCompletionRequest> {
    let transaction_id = ctx.transaction().id.clone();
    let trace_id = ctx.transaction().trace_id.clone();

    let final_request = match policy.on_request(request, &mut ctx.policy_context()).await {
        Ok(request) => request,
        Err(rejection) => {
            state.emitter.policy_event(PolicyEvent::new(
                transaction_id,
                trace_id,
                "policy.request_rejected",
                format!("Request rejected: {rejection}"),
                Severity::Warning,
                serde_json::Map::new(),
            ));
            request_log.flush();
            return Err(ApiError::from(rejection));
        }
    };

    let final_payload = serde_json::to_value(&final_request).unwrap_or(serde_json::Value::Null);

    request_log.record_outbound(state.upstream.name(), final_payload.clone());
    request_log.flush();

    state
        .emitter
        .pipeline(PipelineStage::UpstreamRequestSent, &transaction_id, trace_id, final_payload);

    Ok(final_request)
}

/// Starts the streaming pipeline and returns the SSE response.
async fn stream_response(
    state: &AppState,
    transaction: &Transaction,
    policy: Arc<dyn Policy>,
    ctx: TransactionContext,
    recorder: Arc<TransactionRecorder>,
    mut final_request: openai::ChatCompletionRequest,
) -> ApiResult<Response> {
    final_request.stream = Some(true);

    let upstream_stream = state.upstream.chat_stream(final_request).await?;

    let session = start_stream_with_context(
        policy,
        upstream_stream,
        state.config.limits.stream_inactivity_timeout,
        ctx,
        recorder,
        state.emitter.clone(),
    );

    // The guard rides inside the frame stream: when the client
    // disconnects and axum drops the body, the transaction is cancelled.
    let guard = session.cancel.clone().drop_guard();
    let frames = sse_frames(transaction, session.egress, Some(guard));

    let events = frames.map(|frame| {
        let event = match frame.event {
            Some(name) => Event::default().event(name).data(frame.data),
            None => Event::default().data(frame.data),
        };
        Ok::<_, Infallible>(event)
    });

    log::debug!("returning streaming response");
    Ok(Sse::new(events).into_response())
}

fn validate_request(state: &AppState, model: &str, message_count: usize) -> ApiResult<()> {
    if model.is_empty() {
        return Err(ApiError::Validation("model must not be empty".to_string()));
    }

    if message_count == 0 {
        return Err(ApiError::Validation("messages must not be empty".to_string()));
    }

    let limit = state.config.limits.max_request_messages;
    if message_count > limit {
        return Err(ApiError::Validation(format!(
            "too many messages: {message_count} exceeds the limit of {limit}"
        )));
    }

    Ok(())
}

fn trace_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-trace-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn endpoint(format: ClientFormat) -> &'static str {
    match format {
        ClientFormat::OpenAi => "/v1/chat/completions",
        ClientFormat::Anthropic => "/v1/messages",
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect()
}
