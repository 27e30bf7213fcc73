//! Shared fixtures: a small dealer hierarchy and a fixed clock
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeZone, Utc};
use rolegate::{
    AuthzAdmin, AuthzRead, AuthzStore, Capability, CapabilityId, DirectGrant, Engine, EngineConfig,
    ManualClock, MemoryStore, Mutation, Principal, PrincipalId, ResolveError, Result, Role,
    RoleAssignment, RoleGrant, RoleId,
};

// Roles (lower level = more authority)
pub const ADMIN: RoleId = 1;
pub const DEALER: RoleId = 2;
pub const SUBDEALER: RoleId = 3;
pub const CUSTOMER: RoleId = 5;

// Capabilities
pub const VOUCHERS_READ: CapabilityId = 10;
pub const USERS_CREATE: CapabilityId = 11;
pub const REPORTS_EXPORT: CapabilityId = 12;
pub const BILLING_VIEW: CapabilityId = 13;
pub const CAMPAIGNS_BETA: CapabilityId = 20; // custom, not role-grantable

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// Catalog, roles and role grants; no principals
pub fn catalog() -> Vec<Mutation> {
    let mut m = vec![
        Mutation::UpsertRole(Role::new(ADMIN, "ADMIN", 1)),
        Mutation::UpsertRole(Role::new(DEALER, "DEALER", 2)),
        Mutation::UpsertRole(Role::new(SUBDEALER, "SUBDEALER", 3)),
        Mutation::UpsertRole(Role::new(CUSTOMER, "CUSTOMER", 5)),
        Mutation::UpsertCapability(Capability::system(VOUCHERS_READ, "vouchers.read").in_category("vouchers")),
        Mutation::UpsertCapability(Capability::system(USERS_CREATE, "users.create").in_category("users")),
        Mutation::UpsertCapability(Capability::system(REPORTS_EXPORT, "reports.export")),
        Mutation::UpsertCapability(Capability::system(BILLING_VIEW, "billing.view")),
        Mutation::UpsertCapability(Capability::custom(CAMPAIGNS_BETA, "campaigns.beta")),
    ];
    for cap in [VOUCHERS_READ, USERS_CREATE, REPORTS_EXPORT, BILLING_VIEW] {
        m.push(role_grant(ADMIN, cap, true));
    }
    m.push(role_grant(DEALER, VOUCHERS_READ, true));
    m.push(role_grant(DEALER, USERS_CREATE, true));
    m.push(role_grant(DEALER, BILLING_VIEW, true));
    m.push(role_grant(SUBDEALER, VOUCHERS_READ, true));
    m.push(role_grant(SUBDEALER, REPORTS_EXPORT, false));
    m.push(role_grant(SUBDEALER, CAMPAIGNS_BETA, true));
    m
}

pub fn role_grant(role: RoleId, capability: CapabilityId, granted: bool) -> Mutation {
    Mutation::SetRoleGrant(RoleGrant { role, capability, granted })
}

pub fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.apply_batch(&catalog()).unwrap();
    store
}

pub fn engine(store: Arc<MemoryStore>, cached: bool) -> (Engine<Arc<MemoryStore>>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let config = if cached { EngineConfig::default() } else { EngineConfig::without_cache() };
    (Engine::with_clock(store, &config, clock.clone()), clock)
}

/// Apply a mutation and notify the engine, like the admin write path does
pub fn admin<S: AuthzStore + AuthzAdmin>(engine: &Engine<S>, m: Mutation) {
    engine.store().apply(&m).unwrap();
    engine.notify(&m);
}

pub fn principal(engine: &Engine<Arc<MemoryStore>>, id: PrincipalId, email: &str) {
    admin(engine, Mutation::UpsertPrincipal(Principal::new(id).with_email(email).unwrap()));
}

pub fn assign(engine: &Engine<Arc<MemoryStore>>, a: RoleAssignment) {
    admin(engine, Mutation::AssignRole(a));
}

pub fn direct(engine: &Engine<Arc<MemoryStore>>, g: DirectGrant) {
    admin(engine, Mutation::SetDirectGrant(g));
}

/// Store whose every query fails, as an unreachable database would
pub struct DownStore;

impl AuthzStore for DownStore {
    type Snapshot<'a> = &'a DownStore;

    fn snapshot(&self) -> Result<&DownStore> {
        Ok(self)
    }
}

impl AuthzRead for DownStore {
    fn principal(&self, _: PrincipalId) -> Result<Option<Principal>> {
        Err(down())
    }
    fn principal_by_email(&self, _: &str) -> Result<Option<Principal>> {
        Err(down())
    }
    fn role(&self, _: RoleId) -> Result<Option<Role>> {
        Err(down())
    }
    fn capability(&self, _: CapabilityId) -> Result<Option<Capability>> {
        Err(down())
    }
    fn capability_by_name(&self, _: &str) -> Result<Option<Capability>> {
        Err(down())
    }
    fn role_assignments(&self, _: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Err(down())
    }
    fn role_grants(&self, _: RoleId) -> Result<Vec<RoleGrant>> {
        Err(down())
    }
    fn direct_grants(&self, _: PrincipalId) -> Result<Vec<DirectGrant>> {
        Err(down())
    }
}

fn down() -> ResolveError {
    ResolveError::StoreUnavailable("connection refused".into())
}

/// Wraps a seeded store but returns raw assignment rows, bypassing write-side rules
pub struct RawAssignments {
    pub inner: Arc<MemoryStore>,
    pub assignments: Vec<RoleAssignment>,
}

impl AuthzStore for RawAssignments {
    type Snapshot<'a> = &'a RawAssignments;

    fn snapshot(&self) -> Result<&RawAssignments> {
        Ok(self)
    }
}

impl AuthzRead for RawAssignments {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        self.inner.principal(id)
    }
    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.inner.principal_by_email(email)
    }
    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        self.inner.role(id)
    }
    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.inner.capability(id)
    }
    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        self.inner.capability_by_name(name)
    }
    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        Ok(self.assignments.iter().filter(|a| a.principal == principal).copied().collect())
    }
    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        self.inner.role_grants(role)
    }
    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        self.inner.direct_grants(principal)
    }
}

/// Applies a batch from another thread right after a snapshot's first
/// role-assignment read, while the snapshot is still open
pub struct Racing<S> {
    pub inner: Arc<S>,
    batch: Mutex<Option<Vec<Mutation>>>,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl<S: AuthzStore + AuthzAdmin + 'static> Racing<S> {
    pub fn new(inner: Arc<S>, batch: Vec<Mutation>) -> Self {
        Racing { inner, batch: Mutex::new(Some(batch)), writer: Mutex::new(None) }
    }

    /// Wait for the racing batch to commit
    pub fn settle(&self) {
        if let Some(h) = self.writer.lock().unwrap().take() {
            h.join().unwrap().unwrap();
        }
    }

    fn fire(&self) {
        let Some(batch) = self.batch.lock().unwrap().take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        *self.writer.lock().unwrap() = Some(thread::spawn(move || inner.apply_batch(&batch)));
        // Give the writer time to commit if the snapshot does not hold it off
        thread::sleep(StdDuration::from_millis(50));
    }
}

pub struct RacingView<'a, S: AuthzStore + 'a> {
    view: S::Snapshot<'a>,
    race: &'a Racing<S>,
}

impl<S: AuthzStore + AuthzAdmin + 'static> AuthzStore for Racing<S> {
    type Snapshot<'a> = RacingView<'a, S>
    where
        Self: 'a;

    fn snapshot(&self) -> Result<RacingView<'_, S>> {
        Ok(RacingView { view: self.inner.snapshot()?, race: self })
    }
}

impl<S: AuthzStore + AuthzAdmin + 'static> AuthzRead for RacingView<'_, S> {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        self.view.principal(id)
    }
    fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        self.view.principal_by_email(email)
    }
    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        self.view.role(id)
    }
    fn capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.view.capability(id)
    }
    fn capability_by_name(&self, name: &str) -> Result<Option<Capability>> {
        self.view.capability_by_name(name)
    }
    fn role_assignments(&self, principal: PrincipalId) -> Result<Vec<RoleAssignment>> {
        let rows = self.view.role_assignments(principal)?;
        self.race.fire();
        Ok(rows)
    }
    fn role_grants(&self, role: RoleId) -> Result<Vec<RoleGrant>> {
        self.view.role_grants(role)
    }
    fn direct_grants(&self, principal: PrincipalId) -> Result<Vec<DirectGrant>> {
        self.view.direct_grants(principal)
    }
}

/// Dealer with a direct denial of users.create, and the batch that removes both
pub fn dealer_with_denial<S: AuthzStore + AuthzAdmin>(store: &S, id: PrincipalId) -> Vec<Mutation> {
    store
        .apply_batch(&[
            Mutation::UpsertPrincipal(Principal::new(id)),
            Mutation::AssignRole(RoleAssignment::primary(id, DEALER)),
            Mutation::SetDirectGrant(DirectGrant::deny(id, USERS_CREATE)),
        ])
        .unwrap();
    vec![
        Mutation::UnassignRole { principal: id, role: DEALER },
        Mutation::RemoveDirectGrant { principal: id, capability: USERS_CREATE },
    ]
}
