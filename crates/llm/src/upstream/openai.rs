use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{UpstreamError, UpstreamResult};
use crate::messages::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::upstream::{ChatStream, Upstream};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible chat completion APIs.
///
/// The wire format is already canonical, so this client only handles
/// transport and SSE framing.
pub struct OpenAiUpstream {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiUpstream {
    pub fn new(base_url: Option<String>, api_key: SecretString) -> UpstreamResult<Self> {
        let client = Client::builder().build().map_err(|e| {
            log::error!("Failed to create HTTP client for OpenAI upstream: {e}");
            UpstreamError::InternalError(None)
        })?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string()),
            api_key,
        })
    }

    async fn dispatch(&self, request: &ChatCompletionRequest) -> UpstreamResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = sonic_rs::to_vec(request).map_err(|e| {
            log::error!("Failed to serialize upstream request: {e}");
            UpstreamError::InternalError(None)
        })?;

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| UpstreamError::ConnectionError(format!("Failed to send request to upstream: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Upstream API error ({status}): {error_text}");
            return Err(UpstreamError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    async fn chat(&self, mut request: ChatCompletionRequest) -> UpstreamResult<ChatCompletionResponse> {
        request.stream = Some(false);

        let response = self.dispatch(&request).await?;

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read upstream response body: {e}");
            UpstreamError::InternalError(None)
        })?;

        sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse upstream chat completion response: {e}");
            log::error!("Raw response that failed to parse: {response_text}");
            UpstreamError::InternalError(None)
        })
    }

    async fn chat_stream(&self, mut request: ChatCompletionRequest) -> UpstreamResult<ChatStream> {
        request.stream = Some(true);

        let response = self.dispatch(&request).await?;
        let event_stream = response.bytes_stream().eventsource();

        let chunk_stream = event_stream.filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    return Some(Err(UpstreamError::ConnectionError(format!(
                        "SSE error in upstream stream: {e}"
                    ))));
                }
            };

            if event.data.trim() == "[DONE]" {
                return None;
            }

            match sonic_rs::from_str::<ChatCompletionChunk>(&event.data) {
                Ok(chunk) => Some(Ok(chunk)),
                Err(e) => {
                    log::warn!("Skipping unparseable upstream chunk: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(chunk_stream))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
