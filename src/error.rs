//! Service error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("No token provided")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Unauthorized")]
    Forbidden,

    #[error("Admin access required")]
    AdminOnly,

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid signature")]
    Signature,

    #[error("{0}")]
    Upstream(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) | AppError::Signature => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MissingToken | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::AdminOnly => StatusCode::FORBIDDEN,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client. Upstream and internal details
    /// stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Upstream(_) => "Upstream service unavailable, please retry".into(),
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(err) => tracing::error!(error = ?err, "database error"),
            AppError::Internal(err) => tracing::error!(error = ?err, "internal error"),
            AppError::Upstream(detail) => tracing::error!(detail = %detail, "upstream error"),
            _ => {}
        }

        let body = ErrorBody {
            success: false,
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound("Order").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Conflict("already paid".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Signature.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Upstream("gateway 503".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn upstream_detail_is_not_leaked() {
        let err = AppError::Upstream("razorpay returned 503: internal".into());
        assert!(!err.public_message().contains("razorpay"));
    }

    #[test]
    fn conflict_message_names_the_product() {
        let err = AppError::Conflict("Product Gold Ring is out of stock".into());
        assert!(err.public_message().contains("Gold Ring"));
    }
}
