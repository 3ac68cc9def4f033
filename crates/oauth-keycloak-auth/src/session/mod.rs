//! Server-side browser sessions.
//!
//! A session is identified by an opaque id carried in a cookie and holds
//! everything the login flow needs between requests:
//!
//! - the pending authorization (`state`, `nonce`) while a login is in flight
//! - the authenticated [`SessionPrincipal`]
//! - the [`AuthorizedClient`] with the tokens obtained for the provider
//! - the request path to resume after login
//!
//! Sessions live in a [`SessionStore`]; [`InMemorySessionStore`] keeps them in
//! process memory.

mod store;

pub use store::{InMemorySessionStore, SessionError, SessionStore};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::federation::TokenResponse;
use crate::principal::SessionPrincipal;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a cookie value. Malformed values yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Login in progress: the values sent to the provider in the authorization
/// request, checked again on the callback.
#[derive(Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub nonce: String,
    /// Path to redirect to once the login completes.
    pub return_to: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingAuthorization {
    #[must_use]
    pub fn new(state: String, nonce: String, return_to: Option<String>) -> Self {
        Self {
            state,
            nonce,
            return_to,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns `true` once `lifetime` has passed since the login started.
    #[must_use]
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        checked_add(self.created_at, lifetime)
            .is_some_and(|deadline| OffsetDateTime::now_utc() > deadline)
    }
}

impl fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Tokens obtained from the provider on behalf of the session's user.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizedClient {
    pub registration_id: String,
    /// Name of the principal the tokens were issued for.
    pub principal_name: String,
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub scopes: Vec<String>,
}

impl AuthorizedClient {
    /// Builds the record from a token endpoint response received at `issued_at`.
    #[must_use]
    pub fn from_token_response(
        registration_id: &str,
        principal_name: &str,
        response: &TokenResponse,
        issued_at: OffsetDateTime,
    ) -> Self {
        Self {
            registration_id: registration_id.to_string(),
            principal_name: principal_name.to_string(),
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: expiry(issued_at, response.expires_in),
            scopes: response
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        }
    }

    /// Applies a refresh response. The provider may omit the refresh token,
    /// in which case the current one is kept.
    pub fn apply_refresh(&mut self, response: &TokenResponse, issued_at: OffsetDateTime) {
        self.access_token = response.access_token.clone();
        self.token_type = response.token_type.clone();
        if let Some(refresh_token) = &response.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        self.expires_at = expiry(issued_at, response.expires_in);
        if let Some(scope) = &response.scope {
            self.scopes = scope.split_whitespace().map(String::from).collect();
        }
    }

    /// Returns `true` if the access token expires within `clock_skew` of `now`.
    /// Tokens without a known expiry never count as expired.
    #[must_use]
    pub fn is_expired(&self, clock_skew: Duration, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            checked_add(now, clock_skew).is_none_or(|horizon| horizon >= expires_at)
        })
    }
}

// never print token values
impl fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("registration_id", &self.registration_id)
            .field("principal_name", &self.principal_name)
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// A browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub pending: Option<PendingAuthorization>,
    pub principal: Option<SessionPrincipal>,
    pub authorized_client: Option<AuthorizedClient>,
    /// Request path saved when a login was forced, replayed after the callback.
    pub saved_request: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,
}

impl Session {
    /// Creates an empty, anonymous session with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: SessionId::generate(),
            pending: None,
            principal: None,
            authorized_client: None,
            saved_request: None,
            created_at: now,
            last_accessed_at: now,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Marks the session as used at `now`.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_accessed_at = now;
    }

    /// Returns `true` if the session was idle for longer than `idle_timeout`.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration, now: OffsetDateTime) -> bool {
        checked_add(self.last_accessed_at, idle_timeout).is_some_and(|deadline| now > deadline)
    }

    /// Replaces the id, keeping the contents. Called when the session's
    /// privilege level changes so a pre-login id cannot be reused.
    pub fn rotate_id(&mut self) -> SessionId {
        let previous = self.id;
        self.id = SessionId::generate();
        previous
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// `at + duration`, or `None` past the representable date range.
fn checked_add(at: OffsetDateTime, duration: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(duration)
        .ok()
        .and_then(|d| at.checked_add(d))
}

/// Absolute expiry for a relative `expires_in`. An out-of-range lifetime is
/// treated as no expiry.
fn expiry(issued_at: OffsetDateTime, expires_in: Option<u64>) -> Option<OffsetDateTime> {
    expires_in.and_then(|secs| checked_add(issued_at, Duration::from_secs(secs)))
}
