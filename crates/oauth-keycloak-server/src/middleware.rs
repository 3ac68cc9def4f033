use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderName, HeaderValue, Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use oauth_keycloak_auth::{AccessDecision, Session, SessionConfig, SessionId};
use uuid::Uuid;

use crate::error::AppError;
use crate::server::AppState;

// =============================================================================
// Sessions
// =============================================================================

/// The browser session loaded for this request, if any.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Session cookie: `HttpOnly`, `SameSite=Lax`, scoped to the whole site.
/// No `Max-Age`; idle expiry is enforced by the store.
pub fn session_cookie(config: &SessionConfig, id: SessionId) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), id.to_string()))
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

async fn load_session(state: &AppState, jar: &CookieJar) -> Result<Option<Session>, AppError> {
    let Some(id) = jar
        .get(&state.config.session.cookie_name)
        .and_then(|c| SessionId::parse(c.value()))
    else {
        return Ok(None);
    };
    Ok(state.sessions.load(&id).await?)
}

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::error!(location, "redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Remembers `target` in the session and sends the browser to the login
/// endpoint. Creates the session when the request has none.
pub async fn redirect_to_login(
    state: &AppState,
    session: Option<Session>,
    target: &str,
) -> Result<Response, AppError> {
    let mut session = session.unwrap_or_default();
    session.saved_request = Some(target.to_string());
    state.sessions.save(&session).await?;

    tracing::debug!(session_id = %session.id, target, "login required");

    let jar = CookieJar::new().add(session_cookie(&state.config.session, session.id));
    Ok((jar, found(&state.login_path)).into_response())
}

/// Returns `true` for same-origin absolute paths. Guards the post-login
/// redirect against `//host` and `/\host` targets.
pub fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}

// =============================================================================
// Access control
// =============================================================================

/// Loads the session and applies the access policy.
///
/// - allowed requests continue with the [`CurrentSession`] in extensions
/// - denied anonymous requests are sent to login, whatever the reason
/// - denied authenticated requests get a 403
///
/// Login, callback and logout bypass the policy.
pub async fn access_control(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let session = match load_session(&state, &jar).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let path = req.uri().path().to_string();
    if !state.is_login_route(&path) {
        let principal = session.as_ref().and_then(|s| s.principal.as_ref());
        match state.policy.evaluate(&path, principal) {
            AccessDecision::Allow => {}
            AccessDecision::Deny(reason) if principal.is_none() => {
                tracing::debug!(path, reason = reason.code(), "anonymous request denied");
                let target = req
                    .uri()
                    .path_and_query()
                    .map_or(path, |pq| pq.as_str().to_string());
                return redirect_to_login(&state, session, &target)
                    .await
                    .unwrap_or_else(IntoResponse::into_response);
            }
            AccessDecision::Deny(reason) => {
                tracing::info!(path, reason = reason.code(), "access denied");
                return AppError::Forbidden(reason).into_response();
            }
        }
    }

    req.extensions_mut().insert(CurrentSession(session));
    next.run(req).await
}

// =============================================================================
// Request ids
// =============================================================================

/// Request id, readable from request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| {
            // a hyphenated UUID is always a valid header value
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });

    let req_id = req_id_value.to_str().unwrap_or_default().to_string();
    req.extensions_mut().insert(RequestId(req_id));

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}
