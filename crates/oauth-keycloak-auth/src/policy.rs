//! Route access policy.
//!
//! An ordered table of `(pattern, rule)` pairs. Requests are matched against
//! the patterns in order and the first hit decides; a request matching no
//! pattern is denied.
//!
//! The default table:
//!
//! | Route | Rule |
//! |---|---|
//! | `/`, `/favicon.ico` | permit all |
//! | `/nice` | has authority `NICE` |
//! | anything else | deny |

use serde::Serialize;

use crate::authority::Authority;
use crate::config::{ConfigError, PolicyConfig, RouteRuleConfig, RuleKind};
use crate::principal::SessionPrincipal;

// =============================================================================
// Decision
// =============================================================================

/// Result of evaluating the policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is granted.
    Allow,
    /// Access is denied with a reason.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// Get the deny reason if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum DenyReason {
    /// The rule needs an identity and the request is anonymous.
    AuthenticationRequired,

    /// The principal lacks every one of the required authorities.
    MissingAuthority { required: Vec<Authority> },

    /// Matched a `deny_all` rule, or no rule at all.
    DeniedByDefault,
}

impl DenyReason {
    /// Stable code for logs and error pages.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication-required",
            Self::MissingAuthority { .. } => "missing-authority",
            Self::DeniedByDefault => "denied-by-default",
        }
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::AuthenticationRequired => "Authentication is required".to_string(),
            Self::MissingAuthority { required } => {
                let names: Vec<&str> = required.iter().map(Authority::as_str).collect();
                format!("Requires one of: {}", names.join(", "))
            }
            Self::DeniedByDefault => "Access to this resource is denied".to_string(),
        }
    }
}

// =============================================================================
// Patterns and rules
// =============================================================================

/// Path pattern: exact match, or a `/**` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(String),
    /// `/admin/**` is stored as `/admin` and matches `/admin` and `/admin/...`.
    Prefix(String),
}

impl RoutePattern {
    /// Parses a pattern string.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        if !pattern.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "route pattern '{pattern}' must start with '/'"
            )));
        }

        if let Some(prefix) = pattern.strip_suffix("/**") {
            if prefix.contains('*') {
                return Err(ConfigError::InvalidValue(format!(
                    "route pattern '{pattern}': '*' is only allowed as a trailing '/**'"
                )));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }

        if pattern.contains('*') {
            return Err(ConfigError::InvalidValue(format!(
                "route pattern '{pattern}': '*' is only allowed as a trailing '/**'"
            )));
        }

        Ok(Self::Exact(pattern.to_string()))
    }

    /// Returns `true` if `path` matches.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => p == path,
            // "/**" parses to an empty prefix and matches everything
            Self::Prefix(prefix) => {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            }
        }
    }
}

/// Access rule attached to a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    PermitAll,
    Authenticated,
    HasAuthority(Authority),
    HasAnyAuthority(Vec<Authority>),
    DenyAll,
}

impl AccessRule {
    fn evaluate(&self, principal: Option<&SessionPrincipal>) -> AccessDecision {
        match self {
            Self::PermitAll => AccessDecision::Allow,
            Self::DenyAll => AccessDecision::Deny(DenyReason::DeniedByDefault),
            Self::Authenticated => match principal {
                Some(_) => AccessDecision::Allow,
                None => AccessDecision::Deny(DenyReason::AuthenticationRequired),
            },
            Self::HasAuthority(required) => {
                Self::require_any(principal, std::slice::from_ref(required))
            }
            Self::HasAnyAuthority(required) => Self::require_any(principal, required),
        }
    }

    fn require_any(principal: Option<&SessionPrincipal>, required: &[Authority]) -> AccessDecision {
        let Some(principal) = principal else {
            return AccessDecision::Deny(DenyReason::AuthenticationRequired);
        };

        if required.iter().any(|a| principal.authorities.contains(a)) {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny(DenyReason::MissingAuthority {
                required: required.to_vec(),
            })
        }
    }
}

impl TryFrom<&RouteRuleConfig> for AccessRule {
    type Error = ConfigError;

    fn try_from(config: &RouteRuleConfig) -> Result<Self, Self::Error> {
        let authorities = || config.authorities.iter().map(|a| Authority::new(a.as_str()));

        match config.rule {
            RuleKind::PermitAll => Ok(Self::PermitAll),
            RuleKind::Authenticated => Ok(Self::Authenticated),
            RuleKind::DenyAll => Ok(Self::DenyAll),
            RuleKind::HasAuthority => match config.authorities.as_slice() {
                [single] => Ok(Self::HasAuthority(Authority::new(single.as_str()))),
                _ => Err(ConfigError::InvalidValue(format!(
                    "rule for '{}': has_authority takes exactly one authority",
                    config.pattern
                ))),
            },
            RuleKind::HasAnyAuthority if config.authorities.is_empty() => {
                Err(ConfigError::InvalidValue(format!(
                    "rule for '{}': has_any_authority needs at least one authority",
                    config.pattern
                )))
            }
            RuleKind::HasAnyAuthority => Ok(Self::HasAnyAuthority(authorities().collect())),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Ordered, first-match route table.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    routes: Vec<(RoutePattern, AccessRule)>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new()
            .route(RoutePattern::Exact("/".to_string()), AccessRule::PermitAll)
            .route(
                RoutePattern::Exact("/favicon.ico".to_string()),
                AccessRule::PermitAll,
            )
            .route(
                RoutePattern::Exact("/nice".to_string()),
                AccessRule::HasAuthority(Authority::new(crate::NICE_AUTHORITY)),
            )
    }
}

impl AccessPolicy {
    /// Creates an empty policy, which denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route; earlier routes take precedence.
    #[must_use]
    pub fn route(mut self, pattern: RoutePattern, rule: AccessRule) -> Self {
        self.routes.push((pattern, rule));
        self
    }

    /// Builds the policy from configuration.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        config.rules.iter().try_fold(Self::new(), |policy, entry| {
            let pattern = RoutePattern::parse(&entry.pattern)?;
            let rule = AccessRule::try_from(entry)?;
            Ok(policy.route(pattern, rule))
        })
    }

    /// Decides access to `path` for the given principal (`None` = anonymous).
    #[must_use]
    pub fn evaluate(&self, path: &str, principal: Option<&SessionPrincipal>) -> AccessDecision {
        let decision = self
            .routes
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map_or(
                AccessDecision::Deny(DenyReason::DeniedByDefault),
                |(_, rule)| rule.evaluate(principal),
            );

        tracing::trace!(
            path,
            authenticated = principal.is_some(),
            allowed = decision.is_allowed(),
            "access policy evaluated"
        );

        decision
    }

    /// Number of routes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
