//! LMDB-backed authorization store
//!
//! Storage patterns:
//! - `principal_id` → principal, `email` → principal_id
//! - `role_id` → role, `role_name` → role_id
//! - `capability_id` → capability, `capability_name` → capability_id
//! - `role_id/capability_id` → role grant
//! - `principal_id/role_id` → role assignment
//! - `principal_id/capability_id` → direct grant
//!
//! Composite keys are two big-endian u64s, so every edge table supports a
//! prefix scan on its first id.

use std::path::Path;

use heed::types::{Bytes, SerdeJson, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;

use crate::constants::{LMDB_MAP_SIZE, LMDB_MAX_DBS};
use crate::error::{err, Result};
use crate::model::{
    Capability, CapabilityId, DirectGrant, Principal, PrincipalId, Role, RoleAssignment, RoleGrant,
    RoleId,
};
use crate::mutation::{apply_to, Mutation, WriteTarget};
use crate::store::{AuthzAdmin, AuthzRead, AuthzStore};

type BE = byteorder::BigEndian;
type ById<T> = Database<U64<BE>, SerdeJson<T>>;
type ByName = Database<Str, U64<BE>>;
type Edges<T> = Database<Bytes, SerdeJson<T>>;

/// Create a 16-byte key from two u64 values
#[inline]
pub fn key(a: u64, b: u64) -> [u8; 16] {
    let a = a.to_be_bytes();
    let b = b.to_be_bytes();
    [a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7],
     b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

/// All database handles
#[derive(Clone, Copy)]
struct Dbs {
    principals: ById<Principal>,
    emails: ByName,
    roles: ById<Role>,
    role_names: ByName,
    capabilities: ById<Capability>,
    capability_names: ByName,
    role_grants: Edges<RoleGrant>,
    assignments: Edges<RoleAssignment>,
    direct: Edges<DirectGrant>,
}

impl Dbs {
    fn list_pfx<T: DeserializeOwned + 'static>(tx: &RoTxn, db: &Edges<T>, pfx: u64) -> Result<Vec<T>> {
        let mut r = Vec::new();
        for item in db.prefix_iter(tx, &pfx.to_be_bytes()).map_err(err)? {
            let (k, v) = item.map_err(err)?;
            if k.len() == 16 {
                r.push(v);
            }
        }
        Ok(r)
    }
}

/// Authorization store on an LMDB environment owned by this value
pub struct LmdbStore {
    env: Env,
    dbs: Dbs,
}

impl LmdbStore {
    /// Open (or create) the environment at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(LMDB_MAP_SIZE)
                .max_dbs(LMDB_MAX_DBS)
                .open(path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            principals: env.create_database(&mut tx, Some("principals")).map_err(err)?,
            emails: env.create_database(&mut tx, Some("emails")).map_err(err)?,
            roles: env.create_database(&mut tx, Some("roles")).map_err(err)?,
            role_names: env.create_database(&mut tx, Some("role_names")).map_err(err)?,
            capabilities: env.create_database(&mut tx, Some("capabilities")).map_err(err)?,
            capability_names: env.create_database(&mut tx, Some("capability_names")).map_err(err)?,
            role_grants: env.create_database(&mut tx, Some("role_grants")).map_err(err)?,
            assignments: env.create_database(&mut tx, Some("assignments")).map_err(err)?,
            direct: env.create_database(&mut tx, Some("direct")).map_err(err)?,
        };
        tx.commit().map_err(err)?;
        tracing::debug!(path = %path.display(), "opened lmdb authorization store");
        Ok(LmdbStore { env, dbs })
    }

    /// Run multiple writes in a single transaction; nothing is committed on error
    pub fn transact<T, F: FnOnce(&mut WriteTx<'_>) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = WriteTx { txn: self.env.write_txn().map_err(err)?, dbs: &self.dbs };
        let r = f(&mut tx)?;
        tx.txn.commit().map_err(err)?;
        Ok(r)
    }

    /// Clear all databases (for testing)
    pub fn clear_all(&self) -> Result<()> {
        self.transact(|tx| {
            let d = tx.dbs;
            d.principals.clear(&mut tx.txn).map_err(err)?;
            d.emails.clear(&mut tx.txn).map_err(err)?;
            d.roles.clear(&mut tx.txn).map_err(err)?;
            d.role_names.clear(&mut tx.txn).map_err(err)?;
            d.capabilities.clear(&mut tx.txn).map_err(err)?;
            d.capability_names.clear(&mut tx.txn).map_err(err)?;
            d.role_grants.clear(&mut tx.txn).map_err(err)?;
            d.assignments.clear(&mut tx.txn).map_err(err)?;
            d.direct.clear(&mut tx.txn).map_err(err)
        })
    }
}

/// Read view holding one LMDB read transaction
pub struct LmdbSnapshot<'e> {
    txn: RoTxn<'e>,
    dbs: &'e Dbs,
}

impl AuthzStore for LmdbStore {
    type Snapshot<'a> = LmdbSnapshot<'a>;

    fn snapshot(&self) -> Result<LmdbSnapshot<'_>> {
        Ok(LmdbSnapshot { txn: self.env.read_txn().map_err(err)?, dbs: &self.dbs })
    }
}

impl AuthzRead for LmdbSnapshot<'_> {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        self.dbs.principals.get(&self.txn, &id).map_err(err)
    }

    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        match self.dbs.emails.get(&self.txn, email).map_err(err)? {
            Some(id) => self.dbs.principals.get(&self.txn, &id).map_err(err),
            None => Ok(None),
        }
    }

    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        self.dbs.roles.get(&self.txn, &id).map_err(err)
    }

    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.dbs.capabilities.get(&self.txn, &id).map_err(err)
    }

    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        match self.dbs.capability_names.get(&self.txn, name).map_err(err)? {
            Some(id) => self.dbs.capabilities.get(&self.txn, &id).map_err(err),
            None => Ok(None),
        }
    }

    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Dbs::list_pfx(&self.txn, &self.dbs.assignments, principal)
    }

    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        Dbs::list_pfx(&self.txn, &self.dbs.role_grants, role)
    }

    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        Dbs::list_pfx(&self.txn, &self.dbs.direct, principal)
    }
}

/// One-off queries, each in its own read transaction
impl AuthzRead for LmdbStore {
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

impl AuthzAdmin for LmdbStore {
    fn apply(&self, mutation: &Mutation) -> Result<()> {
        self.transact(|tx| tx.apply(mutation))
    }

    fn apply_batch(&self, mutations: &[Mutation]) -> Result<()> {
        self.transact(|tx| {
            for m in mutations {
                tx.apply(m)?;
            }
            Ok(())
        })
    }
}

/// Write transaction wrapper for batched mutations
pub struct WriteTx<'e> {
    txn: RwTxn<'e>,
    dbs: &'e Dbs,
}

impl WriteTx<'_> {
    /// Apply one mutation inside this transaction
    pub fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        apply_to(self, mutation)
    }
}

impl WriteTarget for WriteTx<'_> {
    fn principal(&mut self, id: PrincipalId) -> Result<Option<Principal>> {
        self.dbs.principals.get(&self.txn, &id).map_err(err)
    }

    fn principal_id_by_email(&mut self, email: &str) -> Result<Option<PrincipalId>> {
        self.dbs.emails.get(&self.txn, email).map_err(err)
    }

    fn put_principal(&mut self, principal: &Principal) -> Result<()> {
        if let Some(email) = &principal.email {
            self.dbs.emails.put(&mut self.txn, email, &principal.id).map_err(err)?;
        }
        self.dbs.principals.put(&mut self.txn, &principal.id, principal).map_err(err)
    }

    fn remove_email(&mut self, email: &str) -> Result<()> {
        self.dbs.emails.delete(&mut self.txn, email).map_err(err).map(|_| ())
    }

    fn role(&mut self, id: RoleId) -> Result<Option<Role>> {
        self.dbs.roles.get(&self.txn, &id).map_err(err)
    }

    fn role_id_by_name(&mut self, name: &str) -> Result<Option<RoleId>> {
        self.dbs.role_names.get(&self.txn, name).map_err(err)
    }

    fn put_role(&mut self, role: &Role) -> Result<()> {
        self.dbs.role_names.put(&mut self.txn, &role.name, &role.id).map_err(err)?;
        self.dbs.roles.put(&mut self.txn, &role.id, role).map_err(err)
    }

    fn remove_role_name(&mut self, name: &str) -> Result<()> {
        self.dbs.role_names.delete(&mut self.txn, name).map_err(err).map(|_| ())
    }

    fn capability(&mut self, id: CapabilityId) -> Result<Option<Capability>> {
        self.dbs.capabilities.get(&self.txn, &id).map_err(err)
    }

    fn capability_id_by_name(&mut self, name: &str) -> Result<Option<CapabilityId>> {
        self.dbs.capability_names.get(&self.txn, name).map_err(err)
    }

    fn put_capability(&mut self, capability: &Capability) -> Result<()> {
        self.dbs.capability_names.put(&mut self.txn, &capability.name, &capability.id).map_err(err)?;
        self.dbs.capabilities.put(&mut self.txn, &capability.id, capability).map_err(err)
    }

    fn remove_capability_name(&mut self, name: &str) -> Result<()> {
        self.dbs.capability_names.delete(&mut self.txn, name).map_err(err).map(|_| ())
    }

    fn put_role_grant(&mut self, grant: &RoleGrant) -> Result<()> {
        self.dbs.role_grants.put(&mut self.txn, &key(grant.role, grant.capability), grant).map_err(err)
    }

    fn remove_role_grant(&mut self, role: RoleId, capability: CapabilityId) -> Result<bool> {
        self.dbs.role_grants.delete(&mut self.txn, &key(role, capability)).map_err(err)
    }

    fn assignments(&mut self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Dbs::list_pfx(&self.txn, &self.dbs.assignments, principal)
    }

    fn put_assignment(&mut self, assignment: &RoleAssignment) -> Result<()> {
        self.dbs
            .assignments
            .put(&mut self.txn, &key(assignment.principal, assignment.role), assignment)
            .map_err(err)
    }

    fn remove_assignment(&mut self, principal: PrincipalId, role: RoleId) -> Result<bool> {
        self.dbs.assignments.delete(&mut self.txn, &key(principal, role)).map_err(err)
    }

    fn put_direct_grant(&mut self, grant: &DirectGrant) -> Result<()> {
        self.dbs.direct.put(&mut self.txn, &key(grant.principal, grant.capability), grant).map_err(err)
    }

    fn remove_direct_grant(&mut self, principal: PrincipalId, capability: CapabilityId) -> Result<bool> {
        self.dbs.direct.delete(&mut self.txn, &key(principal, capability)).map_err(err)
    }
}
