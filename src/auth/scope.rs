//! Scopes: `Type:Name:Actions` triples (Docker auth convention) used to
//! authorize both registry and admin operations.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::GordonError;

/// The kind of resource a [`Scope`] grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// A registry repository.
    Repository,
    /// An admin API resource.
    Admin,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeType::Repository => f.write_str("repository"),
            ScopeType::Admin => f.write_str("admin"),
        }
    }
}

impl FromStr for ScopeType {
    type Err = GordonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repository" => Ok(ScopeType::Repository),
            "admin" => Ok(ScopeType::Admin),
            other => Err(GordonError::Unauthorized(format!(
                "unrecognized scope type: {other}"
            ))),
        }
    }
}

/// A `Type:Name:Actions` authorization triple. Wildcards (`*`) in `name` or
/// an action match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Resource kind.
    #[serde(rename = "type")]
    pub type_: ScopeType,
    /// Resource name, or `*` for any.
    pub name: String,
    /// The set of actions granted/requested.
    pub actions: Vec<String>,
}

impl Scope {
    /// Whether admin resource name `name` is valid (`routes`, `secrets`,
    /// `config`, `status`, or `*`).
    pub fn valid_admin_name(name: &str) -> bool {
        matches!(name, "routes" | "secrets" | "config" | "status" | "*")
    }

    /// Whether this (granted) scope satisfies the requested scope `requested`:
    /// same type, matching name (or this scope's name is `*`), and every
    /// action requested is present in this scope's actions (or this scope
    /// grants `*`).
    pub fn satisfies(&self, requested: &Scope) -> bool {
        if self.type_ != requested.type_ {
            return false;
        }
        if self.name != "*" && self.name != requested.name {
            return false;
        }
        requested.actions.iter().all(|action| {
            self.actions.iter().any(|granted| granted == "*" || granted == action)
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.type_, self.name, self.actions.join(","))
    }
}

impl FromStr for Scope {
    type Err = GordonError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.splitn(3, ':');
        let (Some(type_), Some(name), Some(actions)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GordonError::Unauthorized(format!("malformed scope: {raw}")));
        };

        Ok(Scope {
            type_: type_.parse()?,
            name: name.to_string(),
            actions: actions.split(',').map(str::to_string).collect(),
        })
    }
}

/// Parses a space-joined list of scopes, as stored in a JWT's `scopes` claim.
pub fn parse_scopes(space_joined: &str) -> Vec<Scope> {
    space_joined
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Serializes scopes into the space-joined wire form.
pub fn format_scopes(scopes: &[Scope]) -> String {
    scopes.iter().map(Scope::to_string).collect::<Vec<_>>().join(" ")
}

/// Whether any scope in `granted` satisfies `requested`.
pub fn any_satisfies(granted: &[Scope], requested: &Scope) -> bool {
    granted.iter().any(|g| g.satisfies(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(type_: ScopeType, name: &str, actions: &[&str]) -> Scope {
        Scope {
            type_,
            name: name.to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn wildcard_name_matches_any() {
        let granted = scope(ScopeType::Admin, "*", &["read", "write"]);
        let requested = scope(ScopeType::Admin, "routes", &["read"]);
        assert!(granted.satisfies(&requested));
    }

    #[test]
    fn wildcard_action_matches_any_action() {
        let granted = scope(ScopeType::Admin, "routes", &["*"]);
        let requested = scope(ScopeType::Admin, "routes", &["write"]);
        assert!(granted.satisfies(&requested));
    }

    #[test]
    fn read_only_does_not_satisfy_write() {
        let granted = scope(ScopeType::Admin, "routes", &["read"]);
        let requested = scope(ScopeType::Admin, "routes", &["write"]);
        assert!(!granted.satisfies(&requested));
    }

    #[test]
    fn mismatched_name_is_rejected() {
        let granted = scope(ScopeType::Admin, "secrets", &["read"]);
        let requested = scope(ScopeType::Admin, "routes", &["read"]);
        assert!(!granted.satisfies(&requested));
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let s = scope(ScopeType::Repository, "app", &["pull", "push"]);
        let parsed: Scope = s.to_string().parse().unwrap();
        assert_eq!(s, parsed);
    }
}
