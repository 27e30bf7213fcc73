//! Administrative mutations and their cache invalidation scope
//!
//! The referential rules live here once; each backend only supplies the
//! primitive reads and writes through [`WriteTarget`].

use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Result};
use crate::model::{
    normalize_email, validate_capability_name, Capability, CapabilityId, DirectGrant, Principal,
    PrincipalId, Role, RoleAssignment, RoleGrant, RoleId,
};

/// A grant-affecting write to the authorization store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    UpsertPrincipal(Principal),
    UpsertRole(Role),
    UpsertCapability(Capability),
    SetRoleGrant(RoleGrant),
    RemoveRoleGrant { role: RoleId, capability: CapabilityId },
    /// A primary assignment demotes any other primary of the same principal
    AssignRole(RoleAssignment),
    UnassignRole { principal: PrincipalId, role: RoleId },
    SetDirectGrant(DirectGrant),
    RemoveDirectGrant { principal: PrincipalId, capability: CapabilityId },
}

/// Which cached grant sets a mutation can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invalidation {
    Principal(PrincipalId),
    All,
}

impl Mutation {
    /// Role and catalog edits reach every holder of a role, so they clear everything
    pub fn invalidation(&self) -> Invalidation {
        match self {
            Mutation::UpsertPrincipal(p) => Invalidation::Principal(p.id),
            Mutation::UpsertRole(_) | Mutation::UpsertCapability(_) => Invalidation::All,
            Mutation::SetRoleGrant(_) | Mutation::RemoveRoleGrant { .. } => Invalidation::All,
            Mutation::AssignRole(a) => Invalidation::Principal(a.principal),
            Mutation::UnassignRole { principal, .. } => Invalidation::Principal(*principal),
            Mutation::SetDirectGrant(g) => Invalidation::Principal(g.principal),
            Mutation::RemoveDirectGrant { principal, .. } => Invalidation::Principal(*principal),
        }
    }
}

/// Primitive operations a backend exposes inside one write
pub(crate) trait WriteTarget {
    fn principal(&mut self, id: PrincipalId) -> Result<Option<Principal>>;
    fn principal_id_by_email(&mut self, email: &str) -> Result<Option<PrincipalId>>;
    /// Writes the record and, when present, its email index entry
    fn put_principal(&mut self, principal: &Principal) -> Result<()>;
    fn remove_email(&mut self, email: &str) -> Result<()>;

    fn role(&mut self, id: RoleId) -> Result<Option<Role>>;
    fn role_id_by_name(&mut self, name: &str) -> Result<Option<RoleId>>;
    fn put_role(&mut self, role: &Role) -> Result<()>;
    fn remove_role_name(&mut self, name: &str) -> Result<()>;

    fn capability(&mut self, id: CapabilityId) -> Result<Option<Capability>>;
    fn capability_id_by_name(&mut self, name: &str) -> Result<Option<CapabilityId>>;
    fn put_capability(&mut self, capability: &Capability) -> Result<()>;
    fn remove_capability_name(&mut self, name: &str) -> Result<()>;

    fn put_role_grant(&mut self, grant: &RoleGrant) -> Result<()>;
    fn remove_role_grant(&mut self, role: RoleId, capability: CapabilityId) -> Result<bool>;

    fn assignments(&mut self, principal: PrincipalId) -> Result<Vec<RoleAssignment>>;
    fn put_assignment(&mut self, assignment: &RoleAssignment) -> Result<()>;
    fn remove_assignment(&mut self, principal: PrincipalId, role: RoleId) -> Result<bool>;

    fn put_direct_grant(&mut self, grant: &DirectGrant) -> Result<()>;
    fn remove_direct_grant(&mut self, principal: PrincipalId, capability: CapabilityId) -> Result<bool>;
}

pub(crate) fn apply_to<W: WriteTarget>(w: &mut W, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::UpsertPrincipal(p) => upsert_principal(w, p),
        Mutation::UpsertRole(r) => upsert_role(w, r),
        Mutation::UpsertCapability(c) => upsert_capability(w, c),
        Mutation::SetRoleGrant(g) => {
            require_role(w, g.role)?;
            require_capability(w, g.capability)?;
            w.put_role_grant(g)
        }
        Mutation::RemoveRoleGrant { role, capability } => w.remove_role_grant(*role, *capability).map(|_| ()),
        Mutation::AssignRole(a) => assign_role(w, a),
        Mutation::UnassignRole { principal, role } => w.remove_assignment(*principal, *role).map(|_| ()),
        Mutation::SetDirectGrant(g) => {
            require_principal(w, g.principal)?;
            require_capability(w, g.capability)?;
            w.put_direct_grant(g)
        }
        Mutation::RemoveDirectGrant { principal, capability } => {
            w.remove_direct_grant(*principal, *capability).map(|_| ())
        }
    }
}

fn upsert_principal<W: WriteTarget>(w: &mut W, p: &Principal) -> Result<()> {
    let email = p.email.as_deref().map(normalize_email).transpose()?;
    if let Some(email) = &email {
        if let Some(other) = w.principal_id_by_email(email)? {
            if other != p.id {
                return Err(ResolveError::InvalidInput(format!(
                    "Email '{}' already belongs to principal {}",
                    email, other
                )));
            }
        }
    }
    if let Some(old) = w.principal(p.id)?.and_then(|old| old.email) {
        if Some(&old) != email.as_ref() {
            w.remove_email(&old)?;
        }
    }
    w.put_principal(&Principal { id: p.id, email, active: p.active })
}

fn upsert_role<W: WriteTarget>(w: &mut W, r: &Role) -> Result<()> {
    let name = r.name.trim();
    if name.is_empty() {
        return Err(ResolveError::InvalidInput("Role name cannot be empty".into()));
    }
    if let Some(other) = w.role_id_by_name(name)? {
        if other != r.id {
            return Err(ResolveError::InvalidInput(format!("Role '{}' already exists as {}", name, other)));
        }
    }
    if let Some(old) = w.role(r.id)? {
        if old.name != name {
            w.remove_role_name(&old.name)?;
        }
    }
    w.put_role(&Role { id: r.id, name: name.to_string(), level: r.level })
}

fn upsert_capability<W: WriteTarget>(w: &mut W, c: &Capability) -> Result<()> {
    validate_capability_name(&c.name)?;
    if let Some(other) = w.capability_id_by_name(&c.name)? {
        if other != c.id {
            return Err(ResolveError::InvalidInput(format!(
                "Capability '{}' already exists as {}",
                c.name, other
            )));
        }
    }
    if let Some(old) = w.capability(c.id)? {
        if old.name != c.name {
            w.remove_capability_name(&old.name)?;
        }
    }
    w.put_capability(c)
}

fn assign_role<W: WriteTarget>(w: &mut W, a: &RoleAssignment) -> Result<()> {
    require_principal(w, a.principal)?;
    require_role(w, a.role)?;
    if a.is_primary {
        for mut other in w.assignments(a.principal)? {
            if other.is_primary && other.role != a.role {
                other.is_primary = false;
                w.put_assignment(&other)?;
            }
        }
    }
    w.put_assignment(a)
}

fn require_principal<W: WriteTarget>(w: &mut W, id: PrincipalId) -> Result<()> {
    match w.principal(id)? {
        Some(_) => Ok(()),
        None => Err(ResolveError::UnknownPrincipal(id.to_string())),
    }
}

fn require_role<W: WriteTarget>(w: &mut W, id: RoleId) -> Result<()> {
    match w.role(id)? {
        Some(_) => Ok(()),
        None => Err(ResolveError::InvalidInput(format!("Role {} does not exist", id))),
    }
}

fn require_capability<W: WriteTarget>(w: &mut W, id: CapabilityId) -> Result<()> {
    match w.capability(id)? {
        Some(_) => Ok(()),
        None => Err(ResolveError::UnknownCapability(id.to_string())),
    }
}
