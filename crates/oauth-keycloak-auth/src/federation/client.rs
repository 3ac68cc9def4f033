//! Keycloak relying-party client.
//!
//! Drives the OIDC Authorization Code flow against one provider registration:
//!
//! 1. [`KeycloakClient::authorization_url`] builds the redirect to the
//!    provider's authorization endpoint with `state` and `nonce`
//! 2. [`KeycloakClient::authenticate`] exchanges the returned code, verifies
//!    the ID token against the provider JWKS and maps the principal
//! 3. [`KeycloakClient::refresh`] renews an expired access token
//! 4. [`KeycloakClient::end_session_url`] builds the RP-initiated logout URL
//!
//! Endpoints come from discovery; nothing but the issuer is configured.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Validation, decode_header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use url::Url;

use super::discovery::{DiscoveryCache, DiscoveryCacheConfig};
use super::error::IdpError;
use super::jwks::{ProviderJwksCache, ProviderJwksCacheConfig};
use super::oidc::OidcDiscoveryDocument;
use crate::authority::{AuthoritiesConverter, Claims, RealmRolesConverter, map_authorities};
use crate::config::ProviderConfig;
use crate::principal::SessionPrincipal;

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Generates a random URL-safe token for `state` and `nonce`.
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Client for a single Keycloak registration.
pub struct KeycloakClient {
    registration: ProviderConfig,
    issuer: Url,
    callback_url: Url,
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    jwks: ProviderJwksCache,
    converter: Arc<dyn AuthoritiesConverter>,
}

impl KeycloakClient {
    /// Creates a client for `registration`, with the callback URL resolved
    /// against the application's external `base_url`.
    ///
    /// Authorities are mapped from `realm_access.roles`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid registration or if the HTTP client cannot be built.
    pub fn new(registration: ProviderConfig, base_url: &str) -> Result<Self, IdpError> {
        registration.validate()?;
        let issuer = registration.issuer_url()?;
        let callback_url = registration.callback_url(base_url)?;

        let http_client = reqwest::Client::builder()
            .timeout(registration.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let discovery = DiscoveryCache::new(
            http_client.clone(),
            DiscoveryCacheConfig::default().with_allow_http(registration.allow_http),
        );
        let jwks = ProviderJwksCache::new(
            http_client.clone(),
            ProviderJwksCacheConfig::default().with_allow_http(registration.allow_http),
        );

        Ok(Self {
            registration,
            issuer,
            callback_url,
            http_client,
            discovery,
            jwks,
            converter: Arc::new(RealmRolesConverter),
        })
    }

    /// Replaces the claims to authorities mapping.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn AuthoritiesConverter>) -> Self {
        self.converter = converter;
        self
    }

    #[must_use]
    pub fn registration(&self) -> &ProviderConfig {
        &self.registration
    }

    #[must_use]
    pub fn registration_id(&self) -> &str {
        &self.registration.registration_id
    }

    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    #[must_use]
    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    /// Returns the provider metadata, cached.
    pub async fn discover(&self) -> Result<OidcDiscoveryDocument, IdpError> {
        Ok(self.discovery.get(&self.issuer).await?)
    }

    /// Builds the authorization request URL.
    pub async fn authorization_url(&self, state: &str, nonce: &str) -> Result<Url, IdpError> {
        let discovery = self.discover().await?;
        let mut url = Url::parse(&discovery.authorization_endpoint)?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.registration.client_id)
            .append_pair("redirect_uri", self.callback_url.as_str())
            .append_pair("scope", &self.registration.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);

        tracing::debug!(
            registration_id = %self.registration.registration_id,
            endpoint = %discovery.authorization_endpoint,
            "built authorization request"
        );

        Ok(url)
    }

    /// Exchanges an authorization code at the token endpoint.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, IdpError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
        ];
        self.post_token_request(&params).await
    }

    /// Obtains a new access token with a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, IdpError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self.post_token_request(&params).await?;

        tracing::debug!(
            registration_id = %self.registration.registration_id,
            expires_in = ?response.expires_in,
            "refreshed access token"
        );

        Ok(response)
    }

    /// Sends a grant to the token endpoint.
    ///
    /// A confidential client authenticates with `client_secret_basic` when the
    /// provider accepts it (the default when it lists no methods), otherwise
    /// with `client_secret_post`. Public clients only send `client_id`.
    async fn post_token_request(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, IdpError> {
        let discovery = self.discover().await?;
        let token_endpoint = Url::parse(&discovery.token_endpoint)?;

        let client_id = self.registration.client_id.as_str();
        let mut params: Vec<(&str, &str)> = grant.to_vec();
        let mut request = self.http_client.post(token_endpoint.as_str());

        match &self.registration.client_secret {
            Some(secret) if discovery.supports_token_auth_method("client_secret_basic") => {
                // RFC 6749 section 2.3.1: both parts are form-encoded first
                request = request.basic_auth(form_encode(client_id), Some(form_encode(secret)));
            }
            Some(secret) => {
                params.push(("client_id", client_id));
                params.push(("client_secret", secret.as_str()));
            }
            None => params.push(("client_id", client_id)),
        }

        let response = request.form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(IdpError::oauth_error(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }

            return Err(IdpError::TokenExchangeFailed(format!("HTTP {status} - {body}")));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdpError::TokenExchangeFailed(format!("Failed to parse token response: {e}")))
    }

    /// Verifies an ID token's signature, issuer, audience, expiry and nonce.
    pub async fn validate_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<IdTokenClaims, IdpError> {
        let header = decode_header(id_token)?;
        let kid = header.kid.ok_or(IdpError::MissingKeyId)?;

        let discovery = self.discover().await?;
        let jwks_uri = Url::parse(&discovery.jwks_uri)?;
        let (decoding_key, key_alg) = self.jwks.get_key(&jwks_uri, &kid).await?;

        let mut validation = Validation::new(key_alg.unwrap_or(header.alg));
        validation.set_audience(&[&self.registration.client_id]);
        validation.set_issuer(&[self.issuer.as_str().trim_end_matches('/')]);
        validation.leeway = self.registration.clock_skew.as_secs();

        let claims =
            jsonwebtoken::decode::<IdTokenClaims>(id_token, &decoding_key, &validation)?.claims;

        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(IdpError::NonceMismatch);
        }

        tracing::debug!(subject = %claims.sub, issuer = %claims.iss, "validated ID token");

        Ok(claims)
    }

    /// Completes a login: exchanges `code`, validates the ID token and maps
    /// the principal.
    pub async fn authenticate(
        &self,
        code: &str,
        expected_nonce: &str,
    ) -> Result<AuthenticatedLogin, IdpError> {
        let tokens = self.exchange_code(code).await?;
        let id_token = tokens
            .id_token
            .clone()
            .ok_or_else(|| IdpError::MissingField("id_token".to_string()))?;

        let claims = self.validate_id_token(&id_token, expected_nonce).await?;
        let authorities = map_authorities(self.converter.as_ref(), &claims.to_claims());

        let principal = SessionPrincipal {
            subject: claims.sub.clone(),
            preferred_username: claims.preferred_username.clone(),
            authorities,
            id_token,
            authenticated_at: OffsetDateTime::now_utc(),
        };

        tracing::info!(
            subject = %principal.subject,
            username = principal.display_name(),
            authorities = principal.authorities.len(),
            registration_id = %self.registration.registration_id,
            "user authenticated"
        );

        Ok(AuthenticatedLogin {
            principal,
            tokens,
            claims,
        })
    }

    /// Builds the provider logout URL, or `None` if the provider does not
    /// publish an `end_session_endpoint`.
    pub async fn end_session_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<Url>, IdpError> {
        let discovery = self.discover().await?;
        let Some(endpoint) = discovery.end_session_endpoint.as_deref() else {
            return Ok(None);
        };

        let mut url = Url::parse(endpoint)?;
        {
            let mut params = url.query_pairs_mut();
            if let Some(hint) = id_token_hint.filter(|h| !h.is_empty()) {
                params.append_pair("id_token_hint", hint);
            }
            params.append_pair("client_id", &self.registration.client_id);
            params.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        }

        Ok(Some(url))
    }
}

/// Result of a completed login.
#[derive(Debug)]
pub struct AuthenticatedLogin {
    pub principal: SessionPrincipal,
    pub tokens: TokenResponse,
    pub claims: IdTokenClaims,
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Usually `Bearer`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,

    pub refresh_token: Option<String>,

    /// Present on the code grant; refresh responses may omit it.
    pub id_token: Option<String>,

    /// Granted scopes, space separated.
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,

    pub sub: String,

    /// A single string or an array in the token.
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    pub exp: i64,

    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authorized party; Keycloak sets it to the client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Everything else, including Keycloak's `realm_access`.
    #[serde(flatten)]
    pub extra: Claims,
}

impl IdTokenClaims {
    /// Returns all claims as a JSON object, for authority mapping.
    #[must_use]
    pub fn to_claims(&self) -> Claims {
        let mut claims = self.extra.clone();
        claims.insert("iss".to_string(), Value::from(self.iss.as_str()));
        claims.insert("sub".to_string(), Value::from(self.sub.as_str()));
        claims.insert("aud".to_string(), Value::from(self.aud.clone()));
        claims.insert("exp".to_string(), Value::from(self.exp));
        claims.insert("iat".to_string(), Value::from(self.iat));

        let optional = [
            ("nonce", &self.nonce),
            ("azp", &self.azp),
            ("preferred_username", &self.preferred_username),
            ("email", &self.email),
            ("name", &self.name),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                claims.insert(name.to_string(), Value::from(value.as_str()));
            }
        }

        claims
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}
