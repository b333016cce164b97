use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::core::chat::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body is not a JSON object
    #[error("invalid_json")]
    InvalidJson,

    /// Chat or Claude request without any user text
    #[error("missing_user_message")]
    MissingUserMessage,

    /// Responses request without input
    #[error("missing_input")]
    MissingInput,

    #[error("store_error")]
    Store(String),

    #[error("upstream_error")]
    Upstream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson | ApiError::MissingUserMessage | ApiError::MissingInput => {
                StatusCode::BAD_REQUEST
            },
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Store(_) | ApiError::Upstream(_) => "api_error",
            _ => "invalid_request_error",
        }
    }

    /// Short machine-readable code; also used as the message.
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Store(e) => ApiError::Store(e.to_string()),
            ChatError::Upstream(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        ErrorResponse {
            error: ErrorDetail {
                message: err.code(),
                r#type: err.error_type().to_string(),
                param: None,
                code: Some(err.code()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(detail) | ApiError::Upstream(detail) => {
                tracing::error!("{}: {}", self, detail)
            },
            _ => {},
        }
        (self.status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Same failures rendered in the Claude messages error envelope.
#[derive(Debug)]
pub struct ClaudeApiError(pub ApiError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaudeErrorResponse {
    pub r#type: String,
    pub error: ClaudeErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaudeErrorDetail {
    pub r#type: String,
    pub message: String,
}

impl From<&ApiError> for ClaudeErrorResponse {
    fn from(err: &ApiError) -> Self {
        ClaudeErrorResponse {
            r#type: "error".to_string(),
            error: ClaudeErrorDetail {
                r#type: err.error_type().to_string(),
                message: err.code(),
            },
        }
    }
}

impl From<ApiError> for ClaudeApiError {
    fn from(err: ApiError) -> Self {
        ClaudeApiError(err)
    }
}

impl From<ChatError> for ClaudeApiError {
    fn from(err: ChatError) -> Self {
        ClaudeApiError(err.into())
    }
}

impl IntoResponse for ClaudeApiError {
    fn into_response(self) -> Response {
        let ClaudeApiError(err) = self;
        match &err {
            ApiError::Store(detail) | ApiError::Upstream(detail) => {
                tracing::error!("{}: {}", err, detail)
            },
            _ => {},
        }
        (err.status(), Json(ClaudeErrorResponse::from(&err))).into_response()
    }
}

pub type ClaudeApiResult<T> = Result<T, ClaudeApiError>;
