use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unknown publish target: {0}")]
    UnknownTarget(String),

    #[error("{failures} of {requested} messages to {topic} were not delivered")]
    DeliveryFailed {
        topic: String,
        requested: u64,
        failures: u64,
    },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownTarget(_) => StatusCode::NOT_FOUND,
            ApiError::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::UnknownTarget(_) => "NOT_FOUND",
            ApiError::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            },
            "timestamp": chrono::Utc::now(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let unknown = ApiError::UnknownTarget("topic9".to_string());
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        let failed = ApiError::DeliveryFailed {
            topic: "my-topic-01".to_string(),
            requested: 10,
            failures: 2,
        };
        assert_eq!(failed.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(failed.to_string(), "2 of 10 messages to my-topic-01 were not delivered");
    }
}
