use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the messaging core. Every kind is preserved end to
/// end in the JSON error body; nothing is downgraded to a generic failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection not found")]
    NotFound,
    #[error("not authorized to act on this connection")]
    Forbidden,
    #[error("connection is no longer pending")]
    InvalidTransition,
    #[error("a connection already exists for this pair")]
    DuplicateConnection,
    #[error("cannot send an invitation to yourself")]
    SelfConnection,
    #[error("no accepted connection with this user")]
    NotConnected,
    #[error("message content is empty")]
    EmptyContent,
    #[error("user not found")]
    UserNotFound,
    #[error("username already taken")]
    UsernameTaken,
    #[error("missing or unknown user identity")]
    Unauthorized,
    #[error("storage unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound => "not_found",
            Error::Forbidden => "forbidden",
            Error::InvalidTransition => "invalid_transition",
            Error::DuplicateConnection => "duplicate_connection",
            Error::SelfConnection => "self_connection",
            Error::NotConnected => "not_connected",
            Error::EmptyContent => "empty_content",
            Error::UserNotFound => "user_not_found",
            Error::UsernameTaken => "username_taken",
            Error::Unauthorized => "unauthorized",
            Error::Store(_) => "transient_store_failure",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound | Error::UserNotFound => StatusCode::NOT_FOUND,
            Error::Forbidden | Error::NotConnected => StatusCode::FORBIDDEN,
            Error::InvalidTransition | Error::DuplicateConnection | Error::UsernameTaken => {
                StatusCode::CONFLICT
            }
            Error::SelfConnection | Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));

        (self.status(), body).into_response()
    }
}
