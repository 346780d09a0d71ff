use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::acl::{Principal, PrincipalError, Role};

/// Role assignments as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub root: Vec<String>,
    #[serde(default)]
    pub read_everything: Vec<String>,
}

/// Which principals hold which repository-wide role.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    assignments: HashMap<Role, BTreeSet<Principal>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RoleConfig) -> Result<Self, PrincipalError> {
        let mut registry = Self::new();
        for (role, names) in [
            (Role::Root, &config.root),
            (Role::ReadEverything, &config.read_everything),
        ] {
            for name in names {
                registry.assign(role, name.parse()?);
            }
        }
        Ok(registry)
    }

    /// Returns false if the principal already held the role.
    pub fn assign(&mut self, role: Role, principal: Principal) -> bool {
        self.assignments.entry(role).or_default().insert(principal)
    }

    pub fn has_role(&self, principal: &Principal, role: Role) -> bool {
        self.assignments
            .get(&role)
            .map(|members| members.contains(principal))
            .unwrap_or(false)
    }

    pub fn members(&self, role: Role) -> impl Iterator<Item = &Principal> + '_ {
        self.assignments.get(&role).into_iter().flatten()
    }
}
