//! Provider, session and access-policy configuration.
//!
//! All sections deserialize with defaults, so a configuration file only needs
//! the values that differ. Durations use humantime strings.
//!
//! # Example (TOML)
//!
//! ```toml
//! [provider]
//! issuer_uri = "https://sso.example.com/realms/demo"
//! client_id = "demo-app"
//! client_secret = "change-me"
//! scopes = ["openid", "profile"]
//!
//! [session]
//! idle_timeout = "30m"
//!
//! [[security.rules]]
//! pattern = "/nice"
//! rule = "has_authority"
//! authorities = ["NICE"]
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Placeholder replaced by the application's external base URL.
pub const BASE_URL_PLACEHOLDER: &str = "{baseUrl}";

/// Placeholder replaced by the provider registration id.
pub const REGISTRATION_ID_PLACEHOLDER: &str = "{registrationId}";

/// OIDC provider registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Registration id, used in the login and callback paths.
    pub registration_id: String,

    /// Issuer URL; discovery is fetched from
    /// `{issuer_uri}/.well-known/openid-configuration`.
    pub issuer_uri: String,

    /// OAuth client id registered at the provider.
    pub client_id: String,

    /// Client secret for confidential clients, sent as `client_secret_post`.
    pub client_secret: Option<String>,

    /// Scopes requested at login. Must include `openid`.
    pub scopes: Vec<String>,

    /// Redirect URI template.
    pub redirect_uri: String,

    /// Timeout for discovery, JWKS and token endpoint calls.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Leeway applied to token `exp`/`nbf`/`iat` and access token expiry.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Permit plain HTTP provider URLs (local Keycloak and tests only).
    pub allow_http: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            registration_id: "keycloak".to_string(),
            issuer_uri: "http://localhost:8180/realms/boilerplate".to_string(),
            client_id: "boilerplate".to_string(),
            client_secret: None,
            scopes: vec!["openid".to_string(), "profile".to_string()],
            redirect_uri: format!(
                "{BASE_URL_PLACEHOLDER}/login/oauth2/code/{REGISTRATION_ID_PLACEHOLDER}"
            ),
            request_timeout: Duration::from_secs(30),
            clock_skew: Duration::from_secs(60),
            allow_http: false,
        }
    }
}

impl ProviderConfig {
    /// Parses the issuer URL.
    pub fn issuer_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.issuer_uri).map_err(|e| {
            ConfigError::InvalidValue(format!("issuer_uri '{}': {}", self.issuer_uri, e))
        })
    }

    /// Expands the redirect URI template against the application's base URL.
    pub fn callback_url(&self, base_url: &str) -> Result<Url, ConfigError> {
        let expanded = expand_template(&self.redirect_uri, base_url, &self.registration_id);
        Url::parse(&expanded)
            .map_err(|e| ConfigError::InvalidValue(format!("redirect_uri '{expanded}': {e}")))
    }

    /// Validates the registration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration_id.is_empty() {
            return Err(ConfigError::Missing("provider.registration_id".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("provider.client_id".to_string()));
        }

        let issuer = self.issuer_url()?;
        match issuer.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "issuer_uri scheme '{other}' is not allowed (set allow_http for plain HTTP)"
                )));
            }
        }

        if !self.scopes.iter().any(|s| s == "openid") {
            return Err(ConfigError::InvalidValue(
                "provider.scopes must include 'openid'".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "provider.request_timeout must be > 0".to_string(),
            ));
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidValue(format!(
                "provider.clock_skew must be <= {}s",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        Ok(())
    }
}

/// Upper bound for session idle and login timeouts.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Upper bound for the token clock skew.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

/// Session cookie and lifetime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// Mark the cookie `Secure`. Enable behind HTTPS.
    pub secure: bool,

    /// Sessions unused for this long are discarded.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Maximum time between starting a login and the provider callback.
    #[serde(with = "humantime_serde")]
    pub login_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "OAK_SESSION".to_string(),
            secure: false,
            idle_timeout: Duration::from_secs(30 * 60),
            login_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(ConfigError::InvalidValue(format!(
                "session.cookie_name '{}' must be a non-empty token",
                self.cookie_name
            )));
        }
        if self.idle_timeout.is_zero() || self.login_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session timeouts must be > 0".to_string(),
            ));
        }
        if self.idle_timeout > MAX_SESSION_TIMEOUT || self.login_timeout > MAX_SESSION_TIMEOUT {
            return Err(ConfigError::InvalidValue(format!(
                "session timeouts must be <= {}s",
                MAX_SESSION_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

/// Rule kinds usable in the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    PermitAll,
    Authenticated,
    HasAuthority,
    HasAnyAuthority,
    DenyAll,
}

/// One entry of the route table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRuleConfig {
    /// Exact path, or a prefix ending in `/**`.
    pub pattern: String,

    pub rule: RuleKind,

    /// Required authorities for `has_authority` (exactly one) and
    /// `has_any_authority` (at least one).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,
}

impl RouteRuleConfig {
    #[must_use]
    pub fn new(pattern: impl Into<String>, rule: RuleKind) -> Self {
        Self {
            pattern: pattern.into(),
            rule,
            authorities: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities = authorities.into_iter().map(Into::into).collect();
        self
    }
}

/// Route access policy and logout settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Ordered route table; the first matching entry decides.
    /// Requests matching nothing are denied.
    pub rules: Vec<RouteRuleConfig>,

    /// Where the provider sends the browser after RP-initiated logout.
    pub post_logout_redirect_uri: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RouteRuleConfig::new("/", RuleKind::PermitAll),
                RouteRuleConfig::new("/favicon.ico", RuleKind::PermitAll),
                RouteRuleConfig::new("/nice", RuleKind::HasAuthority)
                    .with_authorities([crate::NICE_AUTHORITY]),
            ],
            post_logout_redirect_uri: format!("{BASE_URL_PLACEHOLDER}/"),
        }
    }
}

impl PolicyConfig {
    /// Expands the post-logout redirect template.
    #[must_use]
    pub fn post_logout_redirect_url(&self, base_url: &str, registration_id: &str) -> String {
        expand_template(&self.post_logout_redirect_uri, base_url, registration_id)
    }
}

/// Expands `{baseUrl}` and `{registrationId}` in a URI template.
///
/// A trailing slash on `base_url` is dropped so `{baseUrl}/` never doubles it.
#[must_use]
pub fn expand_template(template: &str, base_url: &str, registration_id: &str) -> String {
    template
        .replace(BASE_URL_PLACEHOLDER, base_url.trim_end_matches('/'))
        .replace(REGISTRATION_ID_PLACEHOLDER, registration_id)
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
