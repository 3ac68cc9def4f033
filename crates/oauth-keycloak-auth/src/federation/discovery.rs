//! Provider metadata discovery with caching.
//!
//! [`OidcDiscoveryClient`] fetches `{issuer}/.well-known/openid-configuration`
//! and checks that the document describes the issuer it was fetched from.
//! [`DiscoveryCache`] keeps the result for a configurable TTL so the login,
//! callback and logout handlers do not refetch it per request.
//!
//! Plain HTTP issuers are rejected unless `allow_http` is set, and responses
//! larger than `max_response_size` are refused.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use url::Url;

use super::oidc::OidcDiscoveryDocument;

/// Configuration for discovery fetching and caching.
#[derive(Debug, Clone)]
pub struct DiscoveryCacheConfig {
    /// How long a fetched document is reused (default: 1 hour).
    pub ttl: Duration,

    /// Largest accepted response body in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Accept `http://` issuers. Local Keycloak and tests only.
    pub allow_http: bool,
}

impl Default for DiscoveryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl DiscoveryCacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur during OIDC discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The document could not be fetched.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The provider answered with a non-success status.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The body was not a valid discovery document.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// The document's `issuer` is not a URL.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The document describes a different issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The configured issuer.
        expected: String,
        /// The issuer named by the document.
        actual: String,
    },

    /// The issuer URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the configured size limit.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The configured limit.
        max_size: usize,
    },
}

/// Fetches and validates discovery documents.
pub struct OidcDiscoveryClient {
    http_client: reqwest::Client,
    config: DiscoveryCacheConfig,
}

impl OidcDiscoveryClient {
    /// Creates a client on top of a shared HTTP client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: DiscoveryCacheConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Fetches the discovery document for `issuer`.
    ///
    /// # Errors
    ///
    /// Fails if the scheme is not allowed, the request fails or returns a
    /// non-success status, the body is too large or malformed, or the
    /// document's `issuer` differs from `issuer`.
    pub async fn discover(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        self.check_scheme(issuer)?;

        let discovery_url = discovery_url(issuer);

        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(issuer = %issuer, error = %e, "failed to fetch OIDC discovery document");
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let document: OidcDiscoveryDocument = response.json().await.map_err(|e| {
            tracing::warn!(issuer = %issuer, error = %e, "malformed OIDC discovery document");
            DiscoveryError::ParseError(e.to_string())
        })?;

        check_issuer(&document, issuer)?;

        tracing::debug!(issuer = %document.issuer, "discovered OIDC provider metadata");

        Ok(document)
    }

    fn check_scheme(&self, issuer: &Url) -> Result<(), DiscoveryError> {
        match issuer.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}

/// `{issuer}/.well-known/openid-configuration`, keeping any issuer path
/// (Keycloak issuers end in `/realms/{realm}`).
fn discovery_url(issuer: &Url) -> Url {
    let mut url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    url.set_path(&format!("{path}/.well-known/openid-configuration"));
    url
}

/// The document's issuer must be the URL it was retrieved for, ignoring a
/// trailing slash.
fn check_issuer(document: &OidcDiscoveryDocument, expected: &Url) -> Result<(), DiscoveryError> {
    let actual = Url::parse(&document.issuer).map_err(|e| {
        DiscoveryError::InvalidIssuer(format!("{} - {}", document.issuer, e))
    })?;

    let expected = normalize_issuer_key(expected);
    let actual = normalize_issuer_key(&actual);

    if expected != actual {
        return Err(DiscoveryError::IssuerMismatch { expected, actual });
    }
    Ok(())
}

struct CachedDiscovery {
    document: OidcDiscoveryDocument,
    fetched_at: Instant,
}

/// TTL cache in front of [`OidcDiscoveryClient`], keyed by issuer.
pub struct DiscoveryCache {
    client: OidcDiscoveryClient,
    cache: RwLock<HashMap<String, CachedDiscovery>>,
    ttl: Duration,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: DiscoveryCacheConfig) -> Self {
        let ttl = config.ttl;
        Self {
            client: OidcDiscoveryClient::new(http_client, config),
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached document for `issuer`, fetching it when absent or
    /// older than the TTL.
    pub async fn get(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let key = normalize_issuer_key(issuer);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key)
                && cached.fetched_at.elapsed() < self.ttl
            {
                tracing::trace!(issuer = %issuer, "discovery cache hit");
                return Ok(cached.document.clone());
            }
        }

        let document = self.client.discover(issuer).await?;

        self.cache.write().await.insert(
            key,
            CachedDiscovery {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(document)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn normalize_issuer_key(issuer: &Url) -> String {
    issuer.as_str().trim_end_matches('/').to_string()
}
