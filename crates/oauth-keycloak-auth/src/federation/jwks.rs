//! Provider JWK set fetching and caching.
//!
//! ID tokens are verified with the provider's public keys, published at the
//! discovery document's `jwks_uri`. Keys are looked up by the token header's
//! `kid`; an unknown `kid` triggers one refetch so key rotation at the
//! provider is picked up without a restart.
//!
//! Cache lifetime follows the response's `Cache-Control: max-age`, clamped to
//! `[min_ttl, max_ttl]`, or `default_ttl` when the header is absent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

/// Configuration for the provider JWKS cache.
#[derive(Debug, Clone)]
pub struct ProviderJwksCacheConfig {
    /// TTL when the response carries no `max-age` (default: 1 hour).
    pub default_ttl: Duration,

    /// Upper bound on any TTL (default: 24 hours).
    pub max_ttl: Duration,

    /// Lower bound on any TTL (default: 5 minutes).
    pub min_ttl: Duration,

    /// Largest accepted response body in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Accept `http://` JWKS URIs. Local Keycloak and tests only.
    pub allow_http: bool,
}

impl Default for ProviderJwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(300),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl ProviderJwksCacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur during JWKS operations.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// No key with the requested `kid`, even after a refetch.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The JWK could not be turned into a verification key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge { max_size: usize },
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// JWK set cache keyed by JWKS URI.
pub struct ProviderJwksCache {
    http_client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedJwks>>,
    config: ProviderJwksCacheConfig,
}

impl ProviderJwksCache {
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: ProviderJwksCacheConfig) -> Self {
        Self {
            http_client,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns the verification key for `kid` and the algorithm the JWK
    /// declares, if any.
    ///
    /// # Errors
    ///
    /// Fails if the set cannot be fetched, no key has this `kid` after a
    /// refetch, or the JWK is not a usable public key.
    pub async fn get_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<(DecodingKey, Option<Algorithm>), JwksError> {
        if let Some(found) = self.cached_key(jwks_uri, kid).await {
            tracing::trace!(kid, jwks_uri = %jwks_uri, "JWKS cache hit");
            return found;
        }

        tracing::debug!(kid, jwks_uri = %jwks_uri, "JWKS cache miss, refetching");
        self.refresh(jwks_uri).await?;

        self.cached_key(jwks_uri, kid)
            .await
            .unwrap_or_else(|| Err(JwksError::KeyNotFound(kid.to_string())))
    }

    /// `None` when the set is missing, stale, or lacks `kid`.
    async fn cached_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Option<Result<(DecodingKey, Option<Algorithm>), JwksError>> {
        let cache = self.cache.read().await;
        let cached = cache.get(&normalize_uri(jwks_uri))?;
        if Instant::now() >= cached.expires_at {
            return None;
        }

        let jwk = cached
            .jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))?;

        Some(
            DecodingKey::from_jwk(jwk)
                .map(|key| (key, jwk_algorithm(jwk)))
                .map_err(|e| JwksError::InvalidKey(e.to_string())),
        )
    }

    /// Fetches the set and replaces the cached copy.
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<(), JwksError> {
        match jwks_uri.scheme() {
            "https" => {}
            "http" if self.config.allow_http => {}
            _ => return Err(JwksError::InvalidScheme),
        }

        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %jwks_uri, error = %e, "failed to fetch JWKS");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(JwksError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = self.ttl_from_headers(response.headers());

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| JwksError::ParseError(e.to_string()))?;

        tracing::debug!(
            jwks_uri = %jwks_uri,
            keys = jwks.keys.len(),
            ttl_secs = ttl.as_secs(),
            "cached provider JWKS"
        );

        self.cache.write().await.insert(
            normalize_uri(jwks_uri),
            CachedJwks {
                jwks,
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(())
    }

    fn ttl_from_headers(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let max_age = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',')
                    .find_map(|directive| directive.trim().strip_prefix("max-age="))
                    .and_then(|secs| secs.parse::<u64>().ok())
            });

        max_age
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl)
            .clamp(self.config.min_ttl, self.config.max_ttl)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    match jwk.common.key_algorithm? {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // encryption algorithms (RSA-OAEP and friends) are not signing keys
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{CACHE_CONTROL, HeaderMap};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_jwks(kid: &str) -> serde_json::Value {
        let mut jwks: serde_json::Value =
            serde_json::from_str(include_str!("../../tests/fixtures/idp_jwks.json")).unwrap();
        jwks["keys"][0]["kid"] = serde_json::Value::String(kid.to_string());
        jwks
    }

    fn cache(config: ProviderJwksCacheConfig) -> ProviderJwksCache {
        ProviderJwksCache::new(reqwest::Client::new(), config)
    }

    #[test]
    fn test_config_defaults() {
        let config = ProviderJwksCacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_ttl, Duration::from_secs(86400));
        assert_eq!(config.min_ttl, Duration::from_secs(300));
        assert!(!config.allow_http);
    }

    #[test]
    fn test_ttl_from_headers() {
        let cache = cache(
            ProviderJwksCacheConfig::new()
                .with_default_ttl(Duration::from_secs(3600))
                .with_min_ttl(Duration::from_secs(60))
                .with_max_ttl(Duration::from_secs(7200)),
        );

        let headers = HeaderMap::new();
        assert_eq!(cache.ttl_from_headers(&headers), Duration::from_secs(3600));

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, "public, max-age=1800".parse().unwrap());
        assert_eq!(cache.ttl_from_headers(&headers), Duration::from_secs(1800));

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, "max-age=5".parse().unwrap());
        assert_eq!(cache.ttl_from_headers(&headers), Duration::from_secs(60));

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, "max-age=999999".parse().unwrap());
        assert_eq!(cache.ttl_from_headers(&headers), Duration::from_secs(7200));

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, "no-cache".parse().unwrap());
        assert_eq!(cache.ttl_from_headers(&headers), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_http_rejected_by_default() {
        let cache = cache(ProviderJwksCacheConfig::default());
        let uri = Url::parse("http://sso.example.com/certs").unwrap();
        assert!(matches!(cache.refresh(&uri).await, Err(JwksError::InvalidScheme)));
    }

    #[tokio::test]
    async fn test_get_key_fetches_and_caches() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks("key-1")))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache(ProviderJwksCacheConfig::default().with_allow_http(true));
        let uri = Url::parse(&format!("{}/certs", server.uri())).unwrap();

        let (_, alg) = cache.get_key(&uri, "key-1").await.unwrap();
        assert_eq!(alg, Some(Algorithm::RS256));

        // served from cache
        cache.get_key(&uri, "key-1").await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_then_fails() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks("key-1")))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(ProviderJwksCacheConfig::default().with_allow_http(true));
        let uri = Url::parse(&format!("{}/certs", server.uri())).unwrap();

        cache.get_key(&uri, "key-1").await.unwrap();
        let result = cache.get_key(&uri, "rotated-key").await;
        assert!(matches!(result, Err(JwksError::KeyNotFound(kid)) if kid == "rotated-key"));
    }
}
