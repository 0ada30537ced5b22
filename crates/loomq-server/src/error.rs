use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use loomq_core::{FinishError, InspectError, PullError, PushError, ReclaimError, TopicError};
use serde_json::json;
use tracing::error;

/// An HTTP error response: a status and a message rendered as
/// `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub trait IntoHttpError {
    fn into_http_error(self) -> ApiError;
}

impl IntoHttpError for PushError {
    fn into_http_error(self) -> ApiError {
        match self {
            PushError::InvalidTopic(msg) => ApiError::bad_request(msg),
            PushError::Overloaded(topic) => {
                ApiError::unavailable(format!("topic {topic} is overloaded"))
            }
            PushError::TopicClosed(topic) => ApiError::unavailable(format!("topic {topic} is closed")),
            PushError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl IntoHttpError for PullError {
    fn into_http_error(self) -> ApiError {
        match self {
            PullError::TopicNotFound(topic) => {
                ApiError::not_found(format!("topic {topic} not found"))
            }
            PullError::TopicClosed(topic) => ApiError::unavailable(format!("topic {topic} is closed")),
            PullError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl IntoHttpError for FinishError {
    fn into_http_error(self) -> ApiError {
        match self {
            FinishError::MessageNotFound(msg) => ApiError::not_found(msg),
            FinishError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl IntoHttpError for InspectError {
    fn into_http_error(self) -> ApiError {
        match self {
            InspectError::TopicNotFound(topic) => {
                ApiError::not_found(format!("topic {topic} not found"))
            }
            InspectError::MessageNotFound(id) => {
                ApiError::not_found(format!("message {id} not found"))
            }
            InspectError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl IntoHttpError for ReclaimError {
    fn into_http_error(self) -> ApiError {
        match self {
            ReclaimError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl IntoHttpError for TopicError {
    fn into_http_error(self) -> ApiError {
        match self {
            TopicError::AlreadyExists(name) => {
                ApiError::new(StatusCode::CONFLICT, format!("topic {name} already exists"))
            }
            TopicError::InvalidConfig(msg) => ApiError::bad_request(msg),
            TopicError::Storage(e) => ApiError::internal(e.to_string()),
        }
    }
}
