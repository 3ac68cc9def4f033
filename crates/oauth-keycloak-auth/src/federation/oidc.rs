//! Provider metadata from `.well-known/openid-configuration`.
//!
//! Only the members the relying party reads are modelled; unknown members
//! are ignored. See
//! [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html).

use serde::{Deserialize, Serialize};

/// OpenID provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// Issuer identifier; must equal the configured issuer URL.
    pub issuer: String,

    pub authorization_endpoint: String,

    pub token_endpoint: String,

    /// JWK set used to verify ID token signatures.
    pub jwks_uri: String,

    pub response_types_supported: Vec<String>,

    pub subject_types_supported: Vec<String>,

    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Absent means `client_secret_basic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// RP-Initiated Logout endpoint. Keycloak publishes it as
    /// `{issuer}/protocol/openid-connect/logout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

impl OidcDiscoveryDocument {
    /// Absent method lists mean `client_secret_basic` only.
    #[must_use]
    pub fn supports_token_auth_method(&self, method: &str) -> bool {
        match &self.token_endpoint_auth_methods_supported {
            Some(methods) => methods.iter().any(|m| m == method),
            None => method == "client_secret_basic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYCLOAK_DOCUMENT: &str = r#"{
        "issuer": "https://sso.example.com/realms/demo",
        "authorization_endpoint": "https://sso.example.com/realms/demo/protocol/openid-connect/auth",
        "token_endpoint": "https://sso.example.com/realms/demo/protocol/openid-connect/token",
        "jwks_uri": "https://sso.example.com/realms/demo/protocol/openid-connect/certs",
        "userinfo_endpoint": "https://sso.example.com/realms/demo/protocol/openid-connect/userinfo",
        "end_session_endpoint": "https://sso.example.com/realms/demo/protocol/openid-connect/logout",
        "grant_types_supported": ["authorization_code", "implicit", "refresh_token", "password", "client_credentials"],
        "response_types_supported": ["code", "none", "id_token", "token", "id_token token", "code id_token"],
        "subject_types_supported": ["public", "pairwise"],
        "id_token_signing_alg_values_supported": ["PS384", "RS384", "RS256", "ES256"],
        "token_endpoint_auth_methods_supported": ["private_key_jwt", "client_secret_basic", "client_secret_post"],
        "scopes_supported": ["openid", "profile", "email", "roles"],
        "check_session_iframe": "https://sso.example.com/realms/demo/protocol/openid-connect/login-status-iframe.html"
    }"#;

    #[test]
    fn test_parse_keycloak_document() {
        let doc: OidcDiscoveryDocument = serde_json::from_str(KEYCLOAK_DOCUMENT).unwrap();

        assert_eq!(doc.issuer, "https://sso.example.com/realms/demo");
        assert_eq!(
            doc.end_session_endpoint.as_deref(),
            Some("https://sso.example.com/realms/demo/protocol/openid-connect/logout")
        );
        assert!(doc.supports_token_auth_method("client_secret_basic"));
        assert!(doc.supports_token_auth_method("client_secret_post"));
        assert!(!doc.supports_token_auth_method("none"));
    }

    #[test]
    fn test_defaults_when_lists_absent() {
        let json = r#"{
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "jwks_uri": "https://auth.example.com/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        }"#;
        let doc: OidcDiscoveryDocument = serde_json::from_str(json).unwrap();

        assert!(doc.supports_token_auth_method("client_secret_basic"));
        assert!(!doc.supports_token_auth_method("client_secret_post"));
        assert!(doc.end_session_endpoint.is_none());
    }

    #[test]
    fn test_missing_required_member_fails() {
        let json = r#"{ "issuer": "https://auth.example.com" }"#;
        assert!(serde_json::from_str::<OidcDiscoveryDocument>(json).is_err());
    }
}
