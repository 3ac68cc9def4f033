//! Claims to authority mapping.
//!
//! Keycloak places realm-level roles under `realm_access.roles` in the ID
//! token:
//!
//! ```json
//! {
//!   "sub": "f1d2...",
//!   "preferred_username": "alice",
//!   "realm_access": { "roles": ["NICE", "offline_access"] }
//! }
//! ```
//!
//! Every role name becomes an [`Authority`] unchanged. A token without the
//! claim simply grants nothing; mapping never fails.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded ID token claims.
pub type Claims = serde_json::Map<String, Value>;

/// A granted permission, checked by the access policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(String);

impl Authority {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Authority {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Authority {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Converts ID token claims into authorities.
pub trait AuthoritiesConverter: Send + Sync {
    /// Returns the authorities carried by `claims`, in claim order.
    fn convert(&self, claims: &Claims) -> Vec<Authority>;
}

/// Reads Keycloak realm roles from `realm_access.roles`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealmRolesConverter;

impl AuthoritiesConverter for RealmRolesConverter {
    fn convert(&self, claims: &Claims) -> Vec<Authority> {
        let Some(roles) = claims
            .get("realm_access")
            .and_then(Value::as_object)
            .and_then(|realm_access| realm_access.get("roles"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        roles
            .iter()
            .filter_map(Value::as_str)
            .map(Authority::new)
            .collect()
    }
}

/// Maps claims to the authority set assigned to a session principal.
pub fn map_authorities<C>(converter: &C, claims: &Claims) -> BTreeSet<Authority>
where
    C: AuthoritiesConverter + ?Sized,
{
    converter.convert(claims).into_iter().collect()
}
