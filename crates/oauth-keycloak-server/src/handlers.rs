use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::middleware::{CurrentSession, redirect_to_login};
use crate::presenter::SessionView;
use crate::server::AppState;
use crate::templates::{render_error_page, render_home, render_nice};

/// Path of the access token endpoint.
pub const TOKEN_PATH: &str = "/keycloak/token";

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
}

pub async fn home(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    headers: HeaderMap,
) -> Response {
    let view = SessionView::from_principal(session.as_ref().and_then(|s| s.principal.as_ref()));
    if wants_json(&headers) {
        return Json(view).into_response();
    }
    Html(render_home(&view, &state.login_path)).into_response()
}

pub async fn nice(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    headers: HeaderMap,
) -> Response {
    let view = SessionView::from_principal(session.as_ref().and_then(|s| s.principal.as_ref()));
    if wants_json(&headers) {
        return Json(view).into_response();
    }
    Html(render_nice(&view, &state.login_path)).into_response()
}

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(render_error_page(
            "Not found",
            "not_found",
            "The requested page does not exist.",
        )),
    )
        .into_response()
}

/// Returns the session's access token as plain text.
///
/// An expired token is refreshed first when a refresh token is available.
/// Without a usable authorized client the browser is sent to login.
pub async fn keycloak_token(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    uri: Uri,
) -> Result<Response, AppError> {
    let target = uri.path_and_query().map_or(TOKEN_PATH, |pq| pq.as_str());

    let Some(mut session) = session else {
        return redirect_to_login(&state, None, target).await;
    };
    let Some(mut client) = session.authorized_client.take() else {
        return redirect_to_login(&state, Some(session), target).await;
    };

    let now = OffsetDateTime::now_utc();
    if client.is_expired(state.config.provider.clock_skew, now) {
        let Some(refresh_token) = client.refresh_token.clone() else {
            tracing::info!(
                registration_id = %client.registration_id,
                principal_name = %client.principal_name,
                "access token expired and no refresh token, logging in again"
            );
            return redirect_to_login(&state, Some(session), target).await;
        };

        match state.client.refresh(&refresh_token).await {
            Ok(tokens) => client.apply_refresh(&tokens, now),
            Err(e) => {
                tracing::warn!(
                    registration_id = %client.registration_id,
                    principal_name = %client.principal_name,
                    error = %e,
                    "token refresh failed, logging in again"
                );
                return redirect_to_login(&state, Some(session), target).await;
            }
        }

        session.authorized_client = Some(client.clone());
        state.sessions.save(&session).await?;
    }

    tracing::info!(
        registration_id = %client.registration_id,
        principal_name = %client.principal_name,
        expires_at = ?client.expires_at,
        scopes = ?client.scopes,
        "authorized client"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain;charset=UTF-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        client.access_token,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_json() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));

        headers.insert(header::ACCEPT, "text/html,*/*".parse().unwrap());
        assert!(!wants_json(&headers));

        headers.insert(header::ACCEPT, "Application/JSON".parse().unwrap());
        assert!(wants_json(&headers));
    }

    #[tokio::test]
    async fn test_favicon() {
        assert_eq!(favicon().await, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_not_found() {
        assert_eq!(not_found().await.status(), StatusCode::NOT_FOUND);
    }
}
