use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Outcome of a failed core operation. Only `into_response` knows about HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    // validation
    #[error("{0}")]
    Validation(String),

    // conflict
    #[error("email already exists")]
    EmailTaken,
    #[error("this github loginId has bound another account.")]
    IdentityAlreadyBound,
    #[error("mail have already been active or have inactive mail in your mailbox.")]
    AlreadyPending,
    #[error("{0}")]
    Conflict(String),

    // security
    #[error("link invalid, please request a new one")]
    InvalidLink,
    #[error("link expired, please request a new one")]
    ExpiredLink,
    #[error("Unsubscribe failed.")]
    UnsubscribeFailed,
    #[error("invalid oauth state")]
    StateMismatch,
    #[error("Forbidden!")]
    Forbidden,

    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("Your account have been locked")]
    AccountLocked,

    // transient / external
    #[error("upstream service failed, please try again later")]
    Upstream(String),

    #[error("not found")]
    NotFound,
    #[error("Sorry, not implemented!")]
    NotImplemented,
    #[error("server internal error")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::EmailTaken | Self::IdentityAlreadyBound | Self::AlreadyPending | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidLink | Self::ExpiredLink | Self::UnsubscribeFailed | Self::StateMismatch => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden | Self::AccountLocked => StatusCode::FORBIDDEN,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => error!(error = ?e, "internal error"),
            Self::Upstream(detail) => error!(detail = %detail, "upstream failure"),
            _ => {}
        }
        let body = Json(json!({ "succeed": false, "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}
