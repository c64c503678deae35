use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

/// Markers that identify a quota/rate-limit failure when only a message is available.
/// A bare `429` is not one: request ids and offsets in unrelated errors contain it too.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "status 429",
    "status=429",
    "status: 429",
    "\"code\": 429",
    "429 too many requests",
    "resource_exhausted",
    "rate limit",
    "rate-limit",
    "quota",
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")] Validation(String),
    #[error("configuration error: {0}")] Configuration(String),
    #[error("rate limited: {0}")] RateLimited(String),
    #[error("upstream error: status={status} body={message}")] Upstream { status: u16, message: String },
    #[error("transport error: {0}")] Transport(String),
    #[error("parse error: {0}")] Parse(String),
    #[error("no image produced")] NoContent,
    #[error("video generation failed: {0}")] Video(String),
    #[error("operation cancelled")] Cancelled,
    #[error("persistence error: {0}")] Persistence(String),
    #[error("session {0} not found")] SessionNotFound(String),
    #[error("action `{action}` is not allowed while in step `{step}`")] InvalidTransition { step: &'static str, action: &'static str },
    #[error("stage task failed: {0}")] Task(String),
}

/// Lets the retry wrapper decide whether a failure is worth backing off for.
pub trait RateLimitSignal {
    fn is_rate_limited(&self) -> bool;
}

impl RateLimitSignal for PipelineError {
    fn is_rate_limited(&self) -> bool {
        match self {
            PipelineError::RateLimited(_) => true,
            PipelineError::Upstream { status: 429, .. } => true,
            PipelineError::Upstream { message, .. } | PipelineError::Transport(message) => {
                has_rate_limit_marker(message)
            }
            _ => false,
        }
    }
}

pub fn has_rate_limit_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

impl PipelineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    /// Message shown to the seller when a stage fails.
    pub fn user_message(&self) -> String {
        if self.is_rate_limited() {
            return "The AI service is busy right now (rate limit reached). Please wait a minute and try again.".into();
        }
        match self {
            PipelineError::Configuration(msg) => format!("AI service is not configured correctly: {msg}"),
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::NoContent => "The AI did not return an image. Please try again or pick another style.".into(),
            PipelineError::Video(_) | PipelineError::Cancelled => {
                "Video generation failed, but you can still publish the image.".into()
            }
            PipelineError::Persistence(msg) => format!("Publishing failed: {msg}"),
            _ => "Image generation failed. Please try again.".into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PipelineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Configuration(_) | PipelineError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string(), "message": self.user_message() }));
        (status, body).into_response()
    }
}
