use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Debug;

use crate::acl::{Principal, PrincipalError};

/// Source of group membership.
pub trait GroupResolver: Send + Sync + Debug {
    /// Direct members of `group`. Unknown groups have none.
    fn members(&self, group: &str) -> Vec<Principal>;

    /// Whether `principal` belongs to `group` directly or through nested
    /// groups. Membership cycles are tolerated.
    fn is_member(&self, principal: &Principal, group: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![group.to_string()];

        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for member in self.members(&current) {
                if &member == principal {
                    return true;
                }
                if let Principal::Group(nested) = member {
                    pending.push(nested);
                }
            }
        }
        false
    }
}

/// Groups fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticGroups {
    groups: BTreeMap<String, BTreeSet<Principal>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `group name → member strings`.
    pub fn from_config(groups: &BTreeMap<String, Vec<String>>) -> Result<Self, PrincipalError> {
        let mut resolved = Self::new();
        for (group, members) in groups {
            for member in members {
                resolved.add_member(group.clone(), member.parse()?);
            }
        }
        Ok(resolved)
    }

    pub fn add_member(&mut self, group: impl Into<String>, member: Principal) -> bool {
        self.groups.entry(group.into()).or_default().insert(member)
    }

    pub fn with_member(mut self, group: impl Into<String>, member: Principal) -> Self {
        self.add_member(group, member);
        self
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupResolver for StaticGroups {
    fn members(&self, group: &str) -> Vec<Principal> {
        self.groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_membership() {
        let groups = StaticGroups::new()
            .with_member("staff", Principal::group("editors"))
            .with_member("editors", Principal::user("carol"));

        let carol = Principal::user("carol");
        assert!(groups.is_member(&carol, "editors"));
        assert!(groups.is_member(&carol, "staff"));
        assert!(!groups.is_member(&Principal::user("dave"), "staff"));
        assert!(!groups.is_member(&carol, "missing"));
    }

    #[test]
    fn test_cycle_terminates() {
        let groups = StaticGroups::new()
            .with_member("a", Principal::group("b"))
            .with_member("b", Principal::group("a"))
            .with_member("b", Principal::user("erin"));

        assert!(groups.is_member(&Principal::user("erin"), "a"));
        assert!(!groups.is_member(&Principal::user("frank"), "a"));
    }

    #[test]
    fn test_from_config() {
        let mut config = BTreeMap::new();
        config.insert(
            "staff".to_string(),
            vec!["user:carol".to_string(), "group:editors".to_string(), "dave".to_string()],
        );
        let groups = StaticGroups::from_config(&config).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.members("staff").len(), 3);
        assert!(groups.is_member(&Principal::user("dave"), "staff"));
    }
}
