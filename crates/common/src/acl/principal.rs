//! # Principals
//!
//! Principals are the identities that appear in access control lists.
//!
//! There are three kinds:
//! - **users**, the only principals that act on the repository and own resources
//! - **groups**, which grant to their (transitive) members
//! - **pseudo principals**, which stand for a class of callers:
//!   [`Principal::Everyone`], [`Principal::Authenticated`] and [`Principal::Owner`]
//!
//! ## Roles
//!
//! Roles are assigned to principals outside any ACL (see
//! [`RoleRegistry`](crate::auth::RoleRegistry)) and short-circuit ACL evaluation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const USER_PREFIX: &str = "user:";
const GROUP_PREFIX: &str = "group:";
const EVERYONE: &str = "pseudo:all";
const AUTHENTICATED: &str = "pseudo:authenticated";
const OWNER: &str = "pseudo:owner";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrincipalError {
    #[error("principal name is empty")]
    Empty,
    #[error("unknown pseudo principal: {0}")]
    UnknownPseudo(String),
}

/// An identity that can be granted privileges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Principal {
    User(String),
    Group(String),
    /// Any caller, authenticated or not.
    Everyone,
    /// Any authenticated caller.
    Authenticated,
    /// Whoever owns the resource being evaluated.
    Owner,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Principal::User(name.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Principal::Group(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Principal::User(name) | Principal::Group(name) => name,
            Principal::Everyone => EVERYONE,
            Principal::Authenticated => AUTHENTICATED,
            Principal::Owner => OWNER,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Principal::User(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Principal::Group(_))
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            Principal::Everyone | Principal::Authenticated | Principal::Owner
        )
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(name) => write!(f, "{}{}", USER_PREFIX, name),
            Principal::Group(name) => write!(f, "{}{}", GROUP_PREFIX, name),
            pseudo => write!(f, "{}", pseudo.name()),
        }
    }
}

/// Parses `user:name`, `group:name`, the pseudo principal names, or a bare
/// user name.
impl FromStr for Principal {
    type Err = PrincipalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PrincipalError::Empty);
        }
        let principal = match s {
            EVERYONE => Principal::Everyone,
            AUTHENTICATED => Principal::Authenticated,
            OWNER => Principal::Owner,
            other if other.starts_with("pseudo:") => {
                return Err(PrincipalError::UnknownPseudo(other.to_string()))
            }
            other => {
                if let Some(name) = other.strip_prefix(GROUP_PREFIX) {
                    Principal::Group(name.to_string())
                } else {
                    Principal::User(other.strip_prefix(USER_PREFIX).unwrap_or(other).to_string())
                }
            }
        };
        if principal.name().is_empty() {
            return Err(PrincipalError::Empty);
        }
        Ok(principal)
    }
}

impl TryFrom<String> for Principal {
    type Error = PrincipalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.to_string()
    }
}

/// A repository-wide role held by a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Granted every operation without ACL evaluation, including in
    /// read-only mode.
    Root,
    /// Granted every read operation without ACL evaluation.
    ReadEverything,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Root => write!(f, "Root"),
            Role::ReadEverything => write!(f, "ReadEverything"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_principals() {
        assert_eq!("alice".parse::<Principal>().unwrap(), Principal::user("alice"));
        assert_eq!(
            "user:alice".parse::<Principal>().unwrap(),
            Principal::user("alice")
        );
        assert_eq!(
            "group:staff".parse::<Principal>().unwrap(),
            Principal::group("staff")
        );
        assert_eq!("pseudo:all".parse::<Principal>().unwrap(), Principal::Everyone);
        assert_eq!(
            "pseudo:owner".parse::<Principal>().unwrap(),
            Principal::Owner
        );
        assert!("pseudo:nobody".parse::<Principal>().is_err());
        assert!("group:".parse::<Principal>().is_err());
        assert!("".parse::<Principal>().is_err());
    }

    #[test]
    fn test_display_is_parseable() {
        for principal in [
            Principal::user("bob"),
            Principal::group("admins"),
            Principal::Everyone,
            Principal::Authenticated,
            Principal::Owner,
        ] {
            let shown = principal.to_string();
            assert_eq!(shown.parse::<Principal>().unwrap(), principal);
        }
    }
}
