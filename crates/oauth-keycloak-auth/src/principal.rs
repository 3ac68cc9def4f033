//! The authenticated identity attached to a session.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::authority::Authority;

/// Identity established by a successful OIDC login.
///
/// Created when the authorization callback validates the ID token and
/// dropped on logout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPrincipal {
    /// Subject identifier (`sub`) issued by the provider.
    pub subject: String,

    /// `preferred_username` claim, used as the display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Authorities mapped from the ID token claims.
    pub authorities: BTreeSet<Authority>,

    /// Raw ID token, sent back to the provider as `id_token_hint` on logout.
    #[serde(default, skip_serializing)]
    pub id_token: String,

    /// When the login completed.
    #[serde(with = "time::serde::rfc3339")]
    pub authenticated_at: OffsetDateTime,
}

impl SessionPrincipal {
    /// Returns `true` if the principal was granted `authority`.
    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a.as_str() == authority)
    }

    /// Returns `true` if the principal holds at least one of `authorities`.
    #[must_use]
    pub fn has_any_authority<S: AsRef<str>>(&self, authorities: &[S]) -> bool {
        authorities.iter().any(|a| self.has_authority(a.as_ref()))
    }

    /// Display name: the preferred username, or an empty string.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str]) -> SessionPrincipal {
        SessionPrincipal {
            subject: "user-123".to_string(),
            preferred_username: Some("alice".to_string()),
            authorities: roles.iter().copied().map(Authority::from).collect(),
            id_token: "header.payload.signature".to_string(),
            authenticated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_has_authority() {
        let p = principal(&["NICE", "ADMIN"]);
        assert!(p.has_authority("NICE"));
        assert!(!p.has_authority("nice"));
        assert!(p.has_any_authority(&["OTHER", "ADMIN"]));
        assert!(!p.has_any_authority::<&str>(&[]));
    }

    #[test]
    fn test_display_name() {
        let mut p = principal(&[]);
        assert_eq!(p.display_name(), "alice");
        p.preferred_username = None;
        assert_eq!(p.display_name(), "");
    }

    #[test]
    fn test_id_token_is_not_serialized() {
        let json = serde_json::to_value(principal(&["NICE"])).unwrap();
        assert!(json.get("idToken").is_none());
        assert_eq!(json["authorities"], serde_json::json!(["NICE"]));
        assert_eq!(json["preferredUsername"], "alice");
    }
}
