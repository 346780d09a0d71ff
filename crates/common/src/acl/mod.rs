//! Access control lists
//!
//! An [`Acl`] maps each [`Privilege`] to the set of [`Principal`]s granted it.
//! Whether a given caller actually *holds* a privilege is decided by the
//! [`Authorizer`](crate::auth::Authorizer), which also understands pseudo
//! principals, ownership and group membership.

mod principal;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use principal::{Principal, PrincipalError, Role};

/// A named permission on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    /// Full control, including ACL edits.
    All,
    ReadWrite,
    /// Create children in a collection.
    Bind,
    Delete,
    AddComment,
    EditComment,
    Read,
    /// Read a processed (derived) view of the resource only.
    ReadProcessed,
    /// Edit which principals hold `admin`.
    Admin,
}

impl Privilege {
    pub const ALL: [Privilege; 9] = [
        Privilege::All,
        Privilege::ReadWrite,
        Privilege::Bind,
        Privilege::Delete,
        Privilege::AddComment,
        Privilege::EditComment,
        Privilege::Read,
        Privilege::ReadProcessed,
        Privilege::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::All => "all",
            Privilege::ReadWrite => "read-write",
            Privilege::Bind => "bind",
            Privilege::Delete => "delete",
            Privilege::AddComment => "add-comment",
            Privilege::EditComment => "edit-comment",
            Privilege::Read => "read",
            Privilege::ReadProcessed => "read-processed",
            Privilege::Admin => "admin",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown privilege: {0}")]
pub struct UnknownPrivilege(pub String);

impl FromStr for Privilege {
    type Err = UnknownPrivilege;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Privilege::ALL
            .into_iter()
            .find(|privilege| privilege.as_str() == s)
            .ok_or_else(|| UnknownPrivilege(s.to_string()))
    }
}

/// Privilege → granted principals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    entries: BTreeMap<Privilege, BTreeSet<Principal>>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable form of [`Acl::grant`].
    pub fn with_grant(mut self, privilege: Privilege, principal: Principal) -> Self {
        self.grant(privilege, principal);
        self
    }

    /// Returns false if the principal already held the privilege.
    pub fn grant(&mut self, privilege: Privilege, principal: Principal) -> bool {
        self.entries.entry(privilege).or_default().insert(principal)
    }

    /// Returns false if the principal did not hold the privilege.
    pub fn revoke(&mut self, privilege: Privilege, principal: &Principal) -> bool {
        let Some(principals) = self.entries.get_mut(&privilege) else {
            return false;
        };
        let removed = principals.remove(principal);
        if principals.is_empty() {
            self.entries.remove(&privilege);
        }
        removed
    }

    pub fn principals(&self, privilege: Privilege) -> Option<&BTreeSet<Principal>> {
        self.entries.get(&privilege)
    }

    pub fn has_grant(&self, privilege: Privilege, principal: &Principal) -> bool {
        self.entries
            .get(&privilege)
            .map(|principals| principals.contains(principal))
            .unwrap_or(false)
    }

    pub fn privileges(&self) -> impl Iterator<Item = Privilege> + '_ {
        self.entries.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
