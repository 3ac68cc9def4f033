//! Errors raised while talking to the identity provider.

use super::discovery::DiscoveryError;
use super::jwks::JwksError;
use crate::config::ConfigError;

/// Errors from the provider login, refresh and logout flows.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// The provider registration is unusable.
    #[error("Invalid provider configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),

    #[error("JWKS error: {0}")]
    JwksFailed(#[from] JwksError),

    /// The token endpoint answered with something other than a token response.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token validation failed: {0}")]
    TokenValidationFailed(String),

    #[error("ID token is missing key ID (kid) header")]
    MissingKeyId,

    /// The ID token nonce is absent or differs from the one sent at login.
    #[error("Nonce mismatch: ID token nonce does not match expected nonce")]
    NonceMismatch,

    /// A response lacked a field the flow requires, e.g. `id_token`.
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    /// JWT decoding or claim validation error.
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// OAuth error response, e.g. `invalid_grant` for a revoked refresh token.
    #[error("OAuth error from IdP: {error} - {description}")]
    OAuthError { error: String, description: String },
}

impl IdpError {
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuthError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if the provider's tokens or responses were rejected.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::TokenValidationFailed(_)
                | Self::MissingKeyId
                | Self::NonceMismatch
                | Self::MissingField(_)
                | Self::JwtError(_)
        )
    }

    /// Returns `true` if the provider could not be reached or refused the request.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryFailed(_)
                | Self::JwksFailed(_)
                | Self::TokenExchangeFailed(_)
                | Self::NetworkError(_)
                | Self::OAuthError { .. }
        )
    }
}
