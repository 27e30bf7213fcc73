//! Backing store interfaces
//!
//! `AuthzRead` is the set of queries the engine runs. `AuthzStore` hands out
//! snapshots: read views pinned to one point in time, so every row behind a
//! single decision comes from the same committed state. `AuthzAdmin` is the
//! administrative write side; callers apply a [`Mutation`] and then hand the
//! same mutation to `Engine::notify`.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    Capability, CapabilityId, DirectGrant, Principal, PrincipalId, Role, RoleAssignment, RoleGrant,
    RoleId,
};
use crate::mutation::Mutation;

/// Read-only queries against the authorization store.
///
/// Edge queries return every row, expired or not. Expiry is a query-time
/// filter applied by the resolver and aggregator.
pub trait AuthzRead {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>>;

    /// Lookup by an already lower-cased email
    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>>;

    fn role(&self, id: RoleId) -> Result<Option<Role>>;

    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>>;

    /// Exact-match lookup in the capability catalog
    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>>;

    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>>;

    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>>;

    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>>;
}

/// A store the engine can take consistent snapshots of
pub trait AuthzStore: Send + Sync {
    type Snapshot<'a>: AuthzRead
    where
        Self: 'a;

    /// Open a read view; writes committed after this call are invisible to it
    fn snapshot(&self) -> Result<Self::Snapshot<'_>>;
}

/// Administrative writes
pub trait AuthzAdmin {
    fn apply(&self, mutation: &Mutation) -> Result<()>;

    /// Apply several mutations; backends with transactions apply them atomically
    fn apply_batch(&self, mutations: &[Mutation]) -> Result<()> {
        for m in mutations {
            self.apply(m)?;
        }
        Ok(())
    }
}

impl<T: AuthzRead + ?Sized> AuthzRead for &T {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        (**self).principal(id)
    }

    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        (**self).principal_by_email(email)
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        (**self).role(id)
    }

    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        (**self).capability(id)
    }

    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        (**self).capability_by_name(name)
    }

    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        (**self).role_assignments(principal)
    }

    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        (**self).role_grants(role)
    }

    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        (**self).direct_grants(principal)
    }
}

impl<S: AuthzStore + ?Sized> AuthzStore for Arc<S> {
    type Snapshot<'a> = S::Snapshot<'a>
    where
        Self: 'a;

    fn snapshot(&self) -> Result<Self::Snapshot<'_>> {
        (**self).snapshot()
    }
}

impl<A: AuthzAdmin + ?Sized> AuthzAdmin for Arc<A> {
    fn apply(&self, mutation: &Mutation) -> Result<()> {
        (**self).apply(mutation)
    }

    fn apply_batch(&self, mutations: &[Mutation]) -> Result<()> {
        (**self).apply_batch(mutations)
    }
}
