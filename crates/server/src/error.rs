use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use llm::UpstreamError;
use llm::messages::{anthropic, openai};
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;
pub type AnthropicResult<T> = std::result::Result<T, AnthropicApiError>;

/// Proxy errors with their HTTP mapping.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body; rejected before a transaction exists.
    #[error("{0}")]
    Validation(String),

    /// The policy rejected the request or response.
    #[error("{0}")]
    PolicyRejection(String),

    /// Talking to the upstream failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Unexpected internal failure; details are not exposed.
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PolicyRejection(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(error) => {
                StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::PolicyRejection(_) => "policy_rejection",
            Self::Upstream(error) => error.error_type(),
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Upstream(error) => error.client_message(),
            Self::Internal(detail) => {
                log::error!("internal error: {detail}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<pipeline::PolicyRejection> for ApiError {
    fn from(rejection: pipeline::PolicyRejection) -> Self {
        Self::PolicyRejection(rejection.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = openai::ErrorResponse {
            error: openai::ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// [`ApiError`] rendered in the Anthropic error body shape.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AnthropicApiError(#[from] pub ApiError);

impl From<UpstreamError> for AnthropicApiError {
    fn from(error: UpstreamError) -> Self {
        Self(ApiError::Upstream(error))
    }
}

impl From<pipeline::PolicyRejection> for AnthropicApiError {
    fn from(rejection: pipeline::PolicyRejection) -> Self {
        Self(ApiError::from(rejection))
    }
}

impl IntoResponse for AnthropicApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();

        let body = anthropic::ErrorResponse {
            r#type: "error".to_string(),
            error: anthropic::ErrorDetails {
                r#type: self.0.error_type().to_string(),
                message: self.0.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let error = ApiError::Validation("messages must not be empty".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.error_type(), "invalid_request_error");
    }

    #[test]
    fn upstream_500_maps_to_bad_gateway_status() {
        let error = ApiError::Upstream(UpstreamError::ProviderApiError {
            status: 503,
            message: "overloaded".to_string(),
        });
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal("secret stack trace".to_string());
        assert_eq!(error.client_message(), "Internal server error");
    }
}
