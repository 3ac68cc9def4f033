//! View of the current authentication for the pages.

use oauth_keycloak_auth::{NICE_AUTHORITY, SessionPrincipal};
use serde::Serialize;

/// What the pages show about the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// `preferred_username`, or empty for anonymous users.
    pub name: String,
    pub is_authenticated: bool,
    pub is_nice: bool,
}

impl SessionView {
    #[must_use]
    pub fn from_principal(principal: Option<&SessionPrincipal>) -> Self {
        match principal {
            Some(principal) => Self {
                name: principal.display_name().to_string(),
                is_authenticated: true,
                is_nice: principal.has_authority(NICE_AUTHORITY),
            },
            None => Self::anonymous(),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: String::new(),
            is_authenticated: false,
            is_nice: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth_keycloak_auth::Authority;
    use time::OffsetDateTime;

    fn principal(username: Option<&str>, roles: &[&str]) -> SessionPrincipal {
        SessionPrincipal {
            subject: "3f0c2b1e".to_string(),
            preferred_username: username.map(String::from),
            authorities: roles.iter().copied().map(Authority::from).collect(),
            id_token: String::new(),
            authenticated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_anonymous_view() {
        let view = SessionView::from_principal(None);
        assert_eq!(view.name, "");
        assert!(!view.is_authenticated);
        assert!(!view.is_nice);
    }

    #[test]
    fn test_nice_user() {
        let p = principal(Some("alice"), &["NICE", "offline_access"]);
        let view = SessionView::from_principal(Some(&p));
        assert_eq!(view.name, "alice");
        assert!(view.is_authenticated);
        assert!(view.is_nice);
    }

    #[test]
    fn test_authenticated_without_role_or_username() {
        let p = principal(None, &["ADMIN"]);
        let view = SessionView::from_principal(Some(&p));
        assert_eq!(view.name, "");
        assert!(view.is_authenticated);
        assert!(!view.is_nice);
    }

    #[test]
    fn test_serialized_field_names() {
        let p = principal(Some("bob"), &["NICE"]);
        let json = serde_json::to_value(SessionView::from_principal(Some(&p))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "name": "bob", "isAuthenticated": true, "isNice": true })
        );
    }
}
