//! Login, authorization callback and logout.
//!
//! The login endpoint starts an Authorization Code flow with fresh `state`
//! and `nonce` values kept in the session. The callback checks them, signs
//! the user in and rotates the session id. Logout drops the local session and
//! hands the browser to the provider's end-session endpoint when there is one.
//!
//! Logout only accepts `POST`. The session cookie is `SameSite=Lax`, so a
//! cross-site form cannot log a user out, and a plain link cannot either.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use cookie::Cookie;
use oauth_keycloak_auth::{AuthorizedClient, PendingAuthorization, generate_state_token};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::middleware::{CurrentSession, found, is_local_path, session_cookie};
use crate::server::AppState;

pub const LOGOUT_PATH: &str = "/logout";

/// Starts a login: stores a pending authorization and redirects to the provider.
pub async fn authorize(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Response, AppError> {
    let mut session = session.unwrap_or_default();

    let csrf_state = generate_state_token();
    let nonce = generate_state_token();
    let authorization_url = state.client.authorization_url(&csrf_state, &nonce).await?;

    let return_to = session.saved_request.take();
    session.pending = Some(PendingAuthorization::new(csrf_state, nonce, return_to));
    state.sessions.save(&session).await?;

    tracing::debug!(
        session_id = %session.id,
        registration_id = %state.client.registration_id(),
        "login started"
    );

    let jar = CookieJar::new().add(session_cookie(&state.config.session, session.id));
    Ok((jar, found(authorization_url.as_str())).into_response())
}

/// Query parameters of the authorization response.
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Completes a login from the provider's authorization response.
pub async fn callback(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    let not_started = || {
        AppError::login_failed(
            "authorization_request_not_found",
            "No login is in progress for this browser. Please start again.",
        )
    };

    let mut session = session.ok_or_else(not_started)?;
    let pending = session.pending.take().ok_or_else(not_started)?;
    // a pending authorization is single use, whatever the outcome
    state.sessions.save(&session).await?;

    if params.state.as_deref() != Some(pending.state.as_str()) {
        tracing::warn!(session_id = %session.id, "authorization response state mismatch");
        return Err(AppError::login_failed(
            "invalid_state",
            "The login response does not match the login request.",
        ));
    }

    if let Some(error) = params.error {
        tracing::warn!(
            session_id = %session.id,
            error = %error,
            description = params.error_description.as_deref().unwrap_or_default(),
            "identity provider returned an error"
        );
        let description = params
            .error_description
            .unwrap_or_else(|| "The identity provider rejected the login.".to_string());
        return Err(AppError::login_failed(error, description));
    }

    if pending.is_expired(state.config.session.login_timeout) {
        return Err(AppError::login_failed(
            "login_expired",
            "The login took too long. Please try again.",
        ));
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return Err(AppError::login_failed(
            "invalid_request",
            "The login response has no authorization code.",
        ));
    };

    let login = match state.client.authenticate(&code, &pending.nonce).await {
        Ok(login) => login,
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "login failed");
            let code = if e.is_validation_error() {
                "invalid_id_token"
            } else {
                "login_failed"
            };
            return Err(AppError::login_failed(
                code,
                "The login could not be completed.",
            ));
        }
    };

    let previous = session.rotate_id();
    state.sessions.remove(&previous).await?;

    session.authorized_client = Some(AuthorizedClient::from_token_response(
        state.client.registration_id(),
        &login.principal.subject,
        &login.tokens,
        OffsetDateTime::now_utc(),
    ));
    session.principal = Some(login.principal);
    session.saved_request = None;
    state.sessions.save(&session).await?;

    let target = pending
        .return_to
        .as_deref()
        .filter(|p| is_local_path(p))
        .unwrap_or("/");

    let jar = CookieJar::new().add(session_cookie(&state.config.session, session.id));
    Ok((jar, found(target)).into_response())
}

/// Ends the local session and, for signed-in users, the provider session.
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let post_logout_redirect = state
        .config
        .security
        .post_logout_redirect_url(&state.base_url, state.client.registration_id());
    let mut location = post_logout_redirect.clone();

    if let Some(session) = session {
        state.sessions.remove(&session.id).await?;

        if let Some(principal) = &session.principal {
            match state
                .client
                .end_session_url(Some(principal.id_token.as_str()), &post_logout_redirect)
                .await
            {
                Ok(Some(url)) => location = url.to_string(),
                Ok(None) => tracing::debug!("provider has no end_session_endpoint"),
                Err(e) => tracing::warn!(error = %e, "could not build provider logout URL"),
            }
            tracing::info!(subject = %principal.subject, "user logged out");
        }
    }

    let jar = jar.remove(Cookie::build((state.config.session.cookie_name.clone(), "")).path("/"));
    Ok((jar, found(&location)).into_response())
}
