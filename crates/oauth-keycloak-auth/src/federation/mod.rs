//! OpenID Connect federation with Keycloak.
//!
//! - [`oidc`] - provider metadata model
//! - [`discovery`] - `.well-known/openid-configuration` fetching and caching
//! - [`jwks`] - provider signing keys
//! - [`client`] - the Authorization Code, refresh and logout flows
//! - [`error`] - the error type for all of the above

pub mod client;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod oidc;

pub use client::{
    AuthenticatedLogin, IdTokenClaims, KeycloakClient, TokenResponse, generate_state_token,
};
pub use discovery::{DiscoveryCache, DiscoveryCacheConfig, DiscoveryError};
pub use error::IdpError;
pub use jwks::{JwksError, ProviderJwksCache, ProviderJwksCacheConfig};
pub use oidc::OidcDiscoveryDocument;
