use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited".to_string()),
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message, "message": message }))).into_response()
    }
}

impl From<carelink_core::error::CoreError> for ApiError {
    fn from(e: carelink_core::error::CoreError) -> Self {
        use carelink_core::error::CoreError;
        match e {
            CoreError::NotFound => ApiError::NotFound,
            CoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            // Deliberately generic; the body must not reveal which part of
            // the credentials failed.
            CoreError::InvalidCredentials => ApiError::Unauthorized,
            CoreError::AccountNotActive => ApiError::Forbidden,
            CoreError::InvalidCode => ApiError::BadRequest("invalid code".into()),
            CoreError::Database(carelink_db::DbError::NotFound) => ApiError::NotFound,
            CoreError::Database(_) => ApiError::Internal(anyhow::anyhow!("database error")),
            CoreError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<carelink_core::auth::AuthError> for ApiError {
    fn from(e: carelink_core::auth::AuthError) -> Self {
        use carelink_core::auth::AuthError;
        match e {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::InvalidToken
            | AuthError::WrongTokenType => ApiError::Unauthorized,
            AuthError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<carelink_db::DbError> for ApiError {
    fn from(e: carelink_db::DbError) -> Self {
        match e {
            carelink_db::DbError::NotFound => ApiError::NotFound,
            carelink_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}
