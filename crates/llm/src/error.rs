use thiserror::Error;

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Errors raised while talking to the upstream LLM provider.
///
/// Each variant maps to a distinct HTTP status at the server boundary;
/// the proxy never retries upstream failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Authentication failed (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The upstream rejected the request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested model does not exist at the provider.
    #[error("{0}")]
    ModelNotFound(String),

    /// The provider rate limited us.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Provider API returned an error not covered by a specific variant.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error, including mid-stream disconnects.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Unexpected internal failure.
    ///
    /// If Some(message), it came from the provider and can be shown.
    /// If None, details must not leak to the client.
    #[error("Internal upstream error")]
    InternalError(Option<String>),
}

impl UpstreamError {
    /// Maps a non-success upstream HTTP status to the matching variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 | 403 => Self::AuthenticationFailed(message),
            404 => Self::ModelNotFound(message),
            429 => Self::RateLimitExceeded { message },
            500 => Self::InternalError(Some(message)),
            _ => Self::ProviderApiError { status, message },
        }
    }

    /// The HTTP status the proxy should answer with.
    ///
    /// Upstream 5xx become 502: the upstream broke, not the proxy.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailed(_) => 401,
            Self::InvalidRequest(_) => 400,
            Self::ModelNotFound(_) => 404,
            Self::RateLimitExceeded { .. } => 429,
            Self::ProviderApiError { status, .. } => {
                if (500..=599).contains(status) {
                    502
                } else {
                    *status
                }
            }
            Self::ConnectionError(_) => 502,
            Self::InternalError(_) => 500,
        }
    }

    /// The error type string used in wire-format error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::ModelNotFound(_) => "not_found_error",
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::ProviderApiError { .. } | Self::ConnectionError(_) => "api_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}
