//! # oauth-keycloak-auth
//!
//! Relying-party side of an OpenID Connect login against Keycloak.
//!
//! This crate provides:
//! - OIDC discovery, JWKS caching and the Authorization Code / refresh grants
//! - Mapping of Keycloak realm roles to authorities
//! - A static, first-match route access policy
//! - Server-side sessions holding the principal and the authorized client
//!
//! ## Modules
//!
//! - [`config`] - Provider, session and policy configuration
//! - [`federation`] - Keycloak client (discovery, JWKS, token endpoint)
//! - [`authority`] - Claims to authority mapping
//! - [`policy`] - Route access policy
//! - [`principal`] - The authenticated session principal
//! - [`session`] - Session records and storage

pub mod authority;
pub mod config;
pub mod federation;
pub mod policy;
pub mod principal;
pub mod session;

pub use authority::{
    Authority, AuthoritiesConverter, Claims, RealmRolesConverter, map_authorities,
};
pub use config::{
    ConfigError, PolicyConfig, ProviderConfig, RouteRuleConfig, RuleKind, SessionConfig,
    expand_template,
};
pub use federation::{
    AuthenticatedLogin, IdTokenClaims, IdpError, KeycloakClient, OidcDiscoveryDocument,
    TokenResponse, generate_state_token,
};
pub use policy::{AccessDecision, AccessPolicy, AccessRule, DenyReason, RoutePattern};
pub use principal::SessionPrincipal;
pub use session::{
    AuthorizedClient, InMemorySessionStore, PendingAuthorization, Session, SessionError,
    SessionId, SessionStore,
};

/// Authority granted to users allowed on the role-gated page.
pub const NICE_AUTHORITY: &str = "NICE";
