//! Authorization
//!
//! The [`Authorizer`] decides whether a caller may perform an [`Operation`] on
//! a [`Resource`]. Callers are `Option<&Principal>`; `None` is the
//! unauthenticated caller.
//!
//! Evaluation order:
//! 1. a principal holding [`Role::Root`] is always granted
//! 2. mutating operations fail with [`AuthError::ReadOnly`] while the
//!    repository is read-only
//! 3. a principal holding [`Role::ReadEverything`] is granted reads
//! 4. otherwise the resource's effective ACL is evaluated

mod groups;
mod roles;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::acl::{Principal, Privilege, Role};
use crate::path::RepoPath;
use crate::resource::Resource;

pub use groups::{GroupResolver, StaticGroups};
pub use roles::{RoleConfig, RoleRegistry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required for {path}")]
    AuthenticationRequired { path: RepoPath },
    #[error("{principal} is not authorized on {path} (needs one of {privileges:?})")]
    AuthorizationDenied {
        principal: Principal,
        path: RepoPath,
        privileges: Vec<Privilege>,
    },
    #[error("repository is read-only, cannot modify {path}")]
    ReadOnly { path: RepoPath },
}

/// Single-resource operations and the privileges that satisfy them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    /// Read on behalf of a processing pipeline
    ReadProcessed,
    ReadAcl,
    Create,
    Write,
    AddComment,
    EditComment,
    /// Full control
    All,
    WriteAcl,
}

impl Operation {
    /// Holding any one of these grants the operation.
    pub fn privileges(self) -> &'static [Privilege] {
        use Privilege::*;
        match self {
            Operation::Read | Operation::ReadAcl => &[All, ReadWrite, Read],
            Operation::ReadProcessed => &[All, ReadWrite, Read, ReadProcessed],
            Operation::Create => &[All, ReadWrite, Bind],
            Operation::Write => &[All, ReadWrite],
            Operation::AddComment => &[All, ReadWrite, AddComment],
            Operation::EditComment => &[All, EditComment],
            Operation::All | Operation::WriteAcl => &[All],
        }
    }

    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Operation::Read | Operation::ReadProcessed | Operation::ReadAcl
        )
    }
}

#[derive(Debug)]
pub struct Authorizer {
    roles: RoleRegistry,
    groups: Arc<dyn GroupResolver>,
    read_only: AtomicBool,
}

impl Default for Authorizer {
    fn default() -> Self {
        Self::new(RoleRegistry::default(), Arc::new(StaticGroups::default()), false)
    }
}

impl Authorizer {
    pub fn new(roles: RoleRegistry, groups: Arc<dyn GroupResolver>, read_only: bool) -> Self {
        Self {
            roles,
            groups,
            read_only: AtomicBool::new(read_only),
        }
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
        tracing::info!(read_only, "repository read-only mode changed");
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn has_role(&self, principal: Option<&Principal>, role: Role) -> bool {
        principal.is_some_and(|principal| self.roles.has_role(principal, role))
    }

    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
        operation: Operation,
    ) -> Result<(), AuthError> {
        if self.has_role(principal, Role::Root) {
            return Ok(());
        }
        if operation.is_mutating() {
            self.check_writable(resource.path())?;
        } else if self.has_role(principal, Role::ReadEverything) {
            return Ok(());
        }
        self.check_acl(principal, resource, operation.privileges())
    }

    pub fn authorize_read(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::Read)
    }

    pub fn authorize_read_processed(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::ReadProcessed)
    }

    pub fn authorize_read_acl(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::ReadAcl)
    }

    pub fn authorize_create(
        &self,
        principal: Option<&Principal>,
        parent: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, parent, Operation::Create)
    }

    pub fn authorize_write(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::Write)
    }

    pub fn authorize_add_comment(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::AddComment)
    }

    pub fn authorize_edit_comment(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::EditComment)
    }

    pub fn authorize_all(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::All)
    }

    pub fn authorize_write_acl(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize(principal, resource, Operation::WriteAcl)
    }

    /// The holder of the current lock may always unlock. Anyone else needs
    /// full control; with no active lock, write suffices.
    pub fn authorize_unlock(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        if self.has_role(principal, Role::Root) {
            return Ok(());
        }
        self.check_writable(resource.path())?;
        match resource.active_lock() {
            Some(lock) if principal.is_some_and(|p| p.is_user() && p.name() == lock.owner) => {
                Ok(())
            }
            Some(_) => self.check_acl(principal, resource, Operation::All.privileges()),
            None => self.check_acl(principal, resource, Operation::Write.privileges()),
        }
    }

    /// Write on the parent, or `delete` on the resource itself.
    pub fn authorize_delete(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
        parent: &Resource,
    ) -> Result<(), AuthError> {
        if self.has_role(principal, Role::Root) {
            return Ok(());
        }
        self.check_writable(resource.path())?;
        if self
            .check_acl(principal, parent, Operation::Write.privileges())
            .is_ok()
        {
            return Ok(());
        }
        self.check_acl(principal, resource, &[Privilege::Delete])
    }

    /// Changing who holds `admin` needs `admin` and write.
    pub fn authorize_admin_role_edit(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        if self.has_role(principal, Role::Root) {
            return Ok(());
        }
        self.check_writable(resource.path())?;
        self.check_acl(principal, resource, &[Privilege::Admin])?;
        self.check_acl(principal, resource, Operation::Write.privileges())
    }

    pub fn authorize_root_role_edit(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
    ) -> Result<(), AuthError> {
        match principal {
            Some(p) if self.roles.has_role(p, Role::Root) => Ok(()),
            Some(p) => Err(AuthError::AuthorizationDenied {
                principal: p.clone(),
                path: resource.path().clone(),
                privileges: Vec::new(),
            }),
            None => Err(AuthError::AuthenticationRequired {
                path: resource.path().clone(),
            }),
        }
    }

    pub fn authorize_move(
        &self,
        principal: Option<&Principal>,
        source: &Resource,
        source_parent: &Resource,
        dest_parent: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize_read(principal, source)?;
        self.authorize_create(principal, dest_parent)?;
        self.authorize_delete(principal, source, source_parent)
    }

    pub fn authorize_copy(
        &self,
        principal: Option<&Principal>,
        source: &Resource,
        dest_parent: &Resource,
    ) -> Result<(), AuthError> {
        self.authorize_read(principal, source)?;
        self.authorize_create(principal, dest_parent)
    }

    fn check_writable(&self, path: &RepoPath) -> Result<(), AuthError> {
        if self.is_read_only() {
            return Err(AuthError::ReadOnly { path: path.clone() });
        }
        Ok(())
    }

    /// Evaluate `resource`'s effective ACL: any one of `privileges` grants.
    pub fn check_acl(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
        privileges: &[Privilege],
    ) -> Result<(), AuthError> {
        let granted = privileges
            .iter()
            .any(|privilege| self.grants_directly(principal, resource, *privilege))
            || self.grants_via_group(principal, resource, privileges);
        if granted {
            return Ok(());
        }

        let path = resource.path().clone();
        match principal {
            None => Err(AuthError::AuthenticationRequired { path }),
            Some(principal) => {
                tracing::debug!(%principal, %path, ?privileges, "authorization denied");
                Err(AuthError::AuthorizationDenied {
                    principal: principal.clone(),
                    path,
                    privileges: privileges.to_vec(),
                })
            }
        }
    }

    fn grants_directly(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
        privilege: Privilege,
    ) -> bool {
        let Some(granted) = resource.acl().principals(privilege) else {
            return false;
        };
        if granted.contains(&Principal::Everyone) {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        if granted.contains(&Principal::Authenticated) {
            return true;
        }
        if granted.contains(&Principal::Owner)
            && principal.is_user()
            && principal.name() == resource.owner()
        {
            return true;
        }
        granted.contains(principal)
    }

    fn grants_via_group(
        &self,
        principal: Option<&Principal>,
        resource: &Resource,
        privileges: &[Privilege],
    ) -> bool {
        let Some(principal) = principal else {
            return false;
        };
        privileges
            .iter()
            .filter_map(|privilege| resource.acl().principals(*privilege))
            .flatten()
            .any(|entry| match entry {
                Principal::Group(group) => self.groups.is_member(principal, group),
                _ => false,
            })
    }
}
