//! Full HTTP round trips: a mock upstream behind the proxy, real
//! listeners on loopback, and a real SSE client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    response::sse::{Event, Sse},
    routing::post,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream;
use observability::{EventEmitter, MemoryEventStore};
use policies::PolicyHandle;
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn mock_completions(Json(body): Json<Value>) -> axum::response::Response {
    use axum::response::IntoResponse;

    if body["stream"].as_bool().unwrap_or(false) {
        let frames = vec![
            json!({
                "id": "chatcmpl-up", "object": "chat.completion.chunk", "created": 1,
                "model": "gpt-4",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hello"}, "finish_reason": null}]
            })
            .to_string(),
            json!({
                "id": "chatcmpl-up", "object": "chat.completion.chunk", "created": 1,
                "model": "gpt-4",
                "choices": [{"index": 0, "delta": {"content": " world"}, "finish_reason": null}]
            })
            .to_string(),
            json!({
                "id": "chatcmpl-up", "object": "chat.completion.chunk", "created": 1,
                "model": "gpt-4",
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            })
            .to_string(),
            "[DONE]".to_string(),
        ];

        Sse::new(stream::iter(
            frames.into_iter().map(|data| Ok::<_, Infallible>(Event::default().data(data))),
        ))
        .into_response()
    } else {
        Json(json!({
            "id": "chatcmpl-up", "object": "chat.completion", "created": 1,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello world"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }))
        .into_response()
    }
}

async fn spawn_mock_upstream() -> SocketAddr {
    let app = Router::new().route("/v1/chat/completions", post(mock_completions));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

async fn spawn_proxy(upstream_address: SocketAddr, policy_name: &str) -> SocketAddr {
    let config: config::Config = toml::from_str(&format!(
        r#"
        [upstream]
        provider = "openai"
        base_url = "http://{upstream_address}/v1"
        api_key = "test-key"

        [policy]
        name = "{policy_name}"

        [observability]
        stdout = false
        "#
    ))
    .unwrap();

    let upstream = llm::upstream::from_config(&config.upstream).unwrap();
    let policy = policies::build(&config.policy).unwrap();
    let store = Arc::new(MemoryEventStore::new());

    let state = Arc::new(server::AppState {
        config,
        upstream,
        policy: Arc::new(PolicyHandle::new(policy)),
        emitter: EventEmitter::new(vec![Arc::new(observability::sinks::store::StoreSink::new(store.clone()))]),
        store,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(state)).await.unwrap();
    });
    address
}

#[tokio::test]
async fn streaming_passthrough_round_trip() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(upstream, "passthrough").await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());

    let mut events = response.bytes_stream().eventsource();
    let mut contents = Vec::new();
    let mut saw_done = false;

    while let Some(event) = events.next().await {
        let event = event.unwrap();
        if event.data.trim() == "[DONE]" {
            saw_done = true;
            break;
        }
        let value: Value = serde_json::from_str(&event.data).unwrap();
        if let Some(content) = value.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            contents.push(content.to_string());
        }
    }

    assert_eq!(contents, ["Hello", " world"]);
    assert!(saw_done);
}

#[tokio::test]
async fn streaming_uppercase_round_trip() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(upstream, "uppercase").await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }))
        .send()
        .await
        .unwrap();

    let mut events = response.bytes_stream().eventsource();
    let mut text = String::new();

    while let Some(event) = events.next().await {
        let event = event.unwrap();
        if event.data.trim() == "[DONE]" {
            break;
        }
        let value: Value = serde_json::from_str(&event.data).unwrap();
        if let Some(content) = value.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            text.push_str(content);
        }
    }

    assert_eq!(text, "HELLO WORLD");
}

#[tokio::test]
async fn non_streaming_anthropic_conversion() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(upstream, "passthrough").await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy}/v1/messages"))
        .json(&json!({
            "model": "gpt-4",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello world");
    assert_eq!(body["stop_reason"], "end_turn");
}

#[tokio::test]
async fn message_count_limit_is_enforced_at_the_boundary() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(upstream, "passthrough").await;

    let at_limit: Vec<Value> = (0..1000).map(|_| json!({"role": "user", "content": "x"})).collect();
    let over_limit: Vec<Value> = (0..1001).map(|_| json!({"role": "user", "content": "x"})).collect();

    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{proxy}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4", "messages": at_limit}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "exactly the limit is accepted");

    let response = client
        .post(format!("http://{proxy}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4", "messages": over_limit}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400, "one more is rejected");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(upstream, "passthrough").await;

    let response = reqwest::Client::new()
        .post(format!("http://{proxy}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}
