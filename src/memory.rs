//! In-process authorization store

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ResolveError, Result};
use crate::model::{
    Capability, CapabilityId, DirectGrant, Principal, PrincipalId, Role, RoleAssignment, RoleGrant,
    RoleId,
};
use crate::mutation::{apply_to, Mutation, WriteTarget};
use crate::store::{AuthzAdmin, AuthzRead, AuthzStore};

#[derive(Debug, Default, Clone)]
struct Tables {
    principals: BTreeMap<PrincipalId, Principal>,
    emails: HashMap<String, PrincipalId>,
    roles: BTreeMap<RoleId, Role>,
    role_names: HashMap<String, RoleId>,
    capabilities: BTreeMap<CapabilityId, Capability>,
    capability_names: HashMap<String, CapabilityId>,
    role_grants: BTreeMap<(RoleId, CapabilityId), RoleGrant>,
    assignments: BTreeMap<(PrincipalId, RoleId), RoleAssignment>,
    direct: BTreeMap<(PrincipalId, CapabilityId), DirectGrant>,
}

/// `RwLock`-guarded tables implementing the store traits.
///
/// A snapshot holds the read lock, so writers wait until it is dropped.
/// Batches are applied to a copy and swapped in, so a failing batch leaves
/// the store untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| ResolveError::StoreUnavailable("memory store lock poisoned".into()))
    }
}

/// Read view over a [`MemoryStore`] holding its read lock
pub struct MemorySnapshot<'a> {
    tables: RwLockReadGuard<'a, Tables>,
}

impl AuthzStore for MemoryStore {
    type Snapshot<'a> = MemorySnapshot<'a>;

    fn snapshot(&self) -> Result<MemorySnapshot<'_>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ResolveError::StoreUnavailable("memory store lock poisoned".into()))?;
        Ok(MemorySnapshot { tables })
    }
}

impl AuthzRead for MemorySnapshot<'_> {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        Ok(self.tables.principals.get(&id).cloned())
    }

    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let t = &self.tables;
        Ok(t.emails.get(email).and_then(|id| t.principals.get(id)).cloned())
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.tables.roles.get(&id).cloned())
    }

    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        Ok(self.tables.capabilities.get(&id).cloned())
    }

    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        let t = &self.tables;
        Ok(t.capability_names.get(name).and_then(|id| t.capabilities.get(id)).cloned())
    }

    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Ok(self.tables.assignments.range((principal, 0)..=(principal, u64::MAX)).map(|(_, a)| *a).collect())
    }

    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        Ok(self.tables.role_grants.range((role, 0)..=(role, u64::MAX)).map(|(_, g)| *g).collect())
    }

    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        Ok(self.tables.direct.range((principal, 0)..=(principal, u64::MAX)).map(|(_, g)| *g).collect())
    }
}

/// One-off queries, each against its own snapshot
impl AuthzRead for MemoryStore {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        self.snapshot()?.principal(id)
    }

    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.snapshot()?.principal_by_email(email)
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        self.snapshot()?.role(id)
    }

    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.snapshot()?.capability(id)
    }

    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        self.snapshot()?.capability_by_name(name)
    }

    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        self.snapshot()?.role_assignments(principal)
    }

    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        self.snapshot()?.role_grants(role)
    }

    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        self.snapshot()?.direct_grants(principal)
    }
}

impl AuthzAdmin for MemoryStore {
    /// Every write rule checks before it writes, so one mutation applies in place
    fn apply(&self, mutation: &Mutation) -> Result<()> {
        apply_to(&mut *self.write()?, mutation)
    }

    fn apply_batch(&self, mutations: &[Mutation]) -> Result<()> {
        let mut guard = self.write()?;
        let mut staged = guard.clone();
        for m in mutations {
            apply_to(&mut staged, m)?;
        }
        *guard = staged;
        Ok(())
    }
}

impl WriteTarget for Tables {
    fn principal(&mut self, id: PrincipalId) -> Result<Option<Principal>> {
        Ok(self.principals.get(&id).cloned())
    }

    fn principal_id_by_email(&mut self, email: &str) -> Result<Option<PrincipalId>> {
        Ok(self.emails.get(email).copied())
    }

    fn put_principal(&mut self, principal: &Principal) -> Result<()> {
        if let Some(email) = &principal.email {
            self.emails.insert(email.clone(), principal.id);
        }
        self.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    fn remove_email(&mut self, email: &str) -> Result<()> {
        self.emails.remove(email);
        Ok(())
    }

    fn role(&mut self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.roles.get(&id).cloned())
    }

    fn role_id_by_name(&mut self, name: &str) -> Result<Option<RoleId>> {
        Ok(self.role_names.get(name).copied())
    }

    fn put_role(&mut self, role: &Role) -> Result<()> {
        self.role_names.insert(role.name.clone(), role.id);
        self.roles.insert(role.id, role.clone());
        Ok(())
    }

    fn remove_role_name(&mut self, name: &str) -> Result<()> {
        self.role_names.remove(name);
        Ok(())
    }

    fn capability(&mut self, id: CapabilityId) -> Result<Option<Capability>> {
        Ok(self.capabilities.get(&id).cloned())
    }

    fn capability_id_by_name(&mut self, name: &str) -> Result<Option<CapabilityId>> {
        Ok(self.capability_names.get(name).copied())
    }

    fn put_capability(&mut self, capability: &Capability) -> Result<()> {
        self.capability_names.insert(capability.name.clone(), capability.id);
        self.capabilities.insert(capability.id, capability.clone());
        Ok(())
    }

    fn remove_capability_name(&mut self, name: &str) -> Result<()> {
        self.capability_names.remove(name);
        Ok(())
    }

    fn put_role_grant(&mut self, grant: &RoleGrant) -> Result<()> {
        self.role_grants.insert((grant.role, grant.capability), *grant);
        Ok(())
    }

    fn remove_role_grant(&mut self, role: RoleId, capability: CapabilityId) -> Result<bool> {
        Ok(self.role_grants.remove(&(role, capability)).is_some())
    }

    fn assignments(&mut self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Ok(self.assignments.range((principal, 0)..=(principal, u64::MAX)).map(|(_, a)| *a).collect())
    }

    fn put_assignment(&mut self, assignment: &RoleAssignment) -> Result<()> {
        self.assignments.insert((assignment.principal, assignment.role), *assignment);
        Ok(())
    }

    fn remove_assignment(&mut self, principal: PrincipalId, role: RoleId) -> Result<bool> {
        Ok(self.assignments.remove(&(principal, role)).is_some())
    }

    fn put_direct_grant(&mut self, grant: &DirectGrant) -> Result<()> {
        self.direct.insert((grant.principal, grant.capability), *grant);
        Ok(())
    }

    fn remove_direct_grant(&mut self, principal: PrincipalId, capability: CapabilityId) -> Result<bool> {
        Ok(self.direct.remove(&(principal, capability)).is_some())
    }
}
