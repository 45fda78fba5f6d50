use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::routes::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header
    #[error("Authentication credentials required")]
    MissingCredentials,

    /// Authorization header present but not a bearer token
    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    /// No usable `X-Org-Id` header
    #[error("Organization identity required")]
    MissingIdentity,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = match &self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingIdentity => "missing_identity",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(code, self.to_string())),
        )
            .into_response()
    }
}
