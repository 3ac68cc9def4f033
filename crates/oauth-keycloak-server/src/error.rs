//! Application errors and their HTML responses.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use oauth_keycloak_auth::{ConfigError, DenyReason, IdpError, SessionError};

use crate::templates::render_error_page;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Talking to the identity provider failed outside of the login callback.
    #[error(transparent)]
    Idp(#[from] IdpError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The authorization callback could not complete the login.
    #[error("Login failed ({code}): {description}")]
    LoginFailed { code: String, description: String },

    /// The access policy denied the request.
    #[error("Access denied: {}", .0.message())]
    Forbidden(DenyReason),
}

impl AppError {
    #[must_use]
    pub fn login_failed(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::LoginFailed {
            code: code.into(),
            description: description.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, title, code, message) = error_details(&self);

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut response = (status, Html(render_error_page(title, &code, &message))).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// Returns (HTTP status, page title, error code, message).
fn error_details(error: &AppError) -> (StatusCode, &'static str, String, String) {
    match error {
        AppError::Idp(e) if e.is_external_error() => (
            StatusCode::BAD_GATEWAY,
            "Identity provider unavailable",
            "idp_unavailable".to_string(),
            "The identity provider could not be reached. Please try again later.".to_string(),
        ),
        AppError::Config(_) | AppError::Idp(_) | AppError::Session(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server error",
            "server_error".to_string(),
            "An unexpected error occurred.".to_string(),
        ),
        AppError::LoginFailed { code, description } => (
            StatusCode::UNAUTHORIZED,
            "Login failed",
            code.clone(),
            description.clone(),
        ),
        AppError::Forbidden(reason) => (
            StatusCode::FORBIDDEN,
            "Access denied",
            reason.code().to_string(),
            reason.message(),
        ),
    }
}
