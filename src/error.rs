use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("File too large (max {max_bytes} bytes)")]
    TooLarge { max_bytes: u64 },

    #[error("Storage is full ({requested} bytes requested, {available} available)")]
    QuotaExceeded {
        requested: u64,
        available: u64,
        retry_after_secs: u64,
    },

    #[error("Failed to persist upload: {0}")]
    Persist(#[source] std::io::Error),

    #[error("Not found")]
    NotFound,

    #[error("Bad captcha; try again")]
    BadCaptcha,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code so clients can decide whether to retry
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::TooLarge { .. } => "too_large",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::Persist(_) => "storage_failure",
            AppError::NotFound => "not_found",
            AppError::BadCaptcha => "bad_captcha",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadCaptcha => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Persist(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason();

        let error_message = match &self {
            AppError::Persist(e) => {
                tracing::error!("Storage error: {}", e);
                "Storage error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "reason": reason,
        }));

        let mut response = (status, body).into_response();
        if let AppError::QuotaExceeded {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_distinguishable() {
        let too_large = AppError::TooLarge { max_bytes: 5 };
        let quota = AppError::QuotaExceeded {
            requested: 10,
            available: 1,
            retry_after_secs: 60,
        };
        let persist = AppError::Persist(std::io::Error::other("disk gone"));

        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(persist.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_ne!(too_large.reason(), quota.reason());
        assert_ne!(quota.reason(), persist.reason());
    }

    #[test]
    fn quota_rejection_carries_retry_after() {
        let response = AppError::QuotaExceeded {
            requested: 10,
            available: 1,
            retry_after_secs: 60,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    }
}
