//! LMDB backend tests
//!
//! Same engine, persistent store: scenarios, indexes, atomic batches, reopen.

mod common;

use std::sync::Arc;

use common::*;
use rolegate::{
    AuthzAdmin, AuthzRead, AuthzStore, DirectGrant, Engine, EngineConfig, ErrorKind, LmdbStore, ManualClock,
    Mutation, Principal, PrincipalRef, Reason, RoleAssignment, RoleLevel,
};
use tempfile::TempDir;

fn open() -> (TempDir, Arc<LmdbStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LmdbStore::open(dir.path().join("authz.mdb")).unwrap());
    store.apply_batch(&catalog()).unwrap();
    (dir, store)
}

fn engine_on(store: Arc<LmdbStore>) -> Engine<Arc<LmdbStore>> {
    Engine::with_clock(store, &EngineConfig::default(), Arc::new(ManualClock::new(t0())))
}

// ============================================================================
// Engine over LMDB
// ============================================================================

#[test]
fn decisions_match_reference_scenarios() {
    let (_dir, store) = open();
    let engine = engine_on(store);
    admin(&engine, Mutation::UpsertPrincipal(Principal::new(100).with_email("u@example.com").unwrap()));
    admin(&engine, Mutation::AssignRole(RoleAssignment::primary(100, SUBDEALER)));

    let u = PrincipalRef::email("U@example.com");
    assert_eq!(engine.decide(&u, "vouchers.read").reason, Reason::RoleGranted);
    assert_eq!(engine.primary_level(&u).unwrap(), RoleLevel::Level(3));

    admin(&engine, Mutation::SetDirectGrant(DirectGrant::deny(100, VOUCHERS_READ)));
    assert_eq!(engine.decide(&u, "vouchers.read").reason, Reason::DirectDenied);

    assert_eq!(engine.decide(&PrincipalRef::Id(100), "users.create").reason, Reason::NotGranted);
}

#[test]
fn edge_scans_stay_within_prefix() {
    let (_dir, store) = open();
    store
        .apply_batch(&[
            Mutation::UpsertPrincipal(Principal::new(1)),
            Mutation::UpsertPrincipal(Principal::new(2)),
            Mutation::AssignRole(RoleAssignment::primary(1, DEALER)),
            Mutation::AssignRole(RoleAssignment::secondary(2, ADMIN)),
            Mutation::SetDirectGrant(DirectGrant::allow(2, CAMPAIGNS_BETA)),
        ])
        .unwrap();

    let a1 = store.role_assignments(1).unwrap();
    assert_eq!(a1, vec![RoleAssignment::primary(1, DEALER)]);
    assert!(store.direct_grants(1).unwrap().is_empty());
    assert_eq!(store.direct_grants(2).unwrap().len(), 1);
    assert_eq!(store.role_grants(ADMIN).unwrap().len(), 4);
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_ignores_later_commits() {
    let (_dir, store) = open();
    store.apply(&Mutation::UpsertPrincipal(Principal::new(1))).unwrap();

    let snap = store.snapshot().unwrap();
    // A thread holds one LMDB transaction at a time, so write from another
    let writer = Arc::clone(&store);
    std::thread::spawn(move || writer.apply(&Mutation::AssignRole(RoleAssignment::primary(1, DEALER))))
        .join()
        .unwrap()
        .unwrap();

    assert!(snap.role_assignments(1).unwrap().is_empty());
    drop(snap);
    assert_eq!(store.role_assignments(1).unwrap().len(), 1);
}

#[test]
fn decision_reads_one_committed_state() {
    let (_dir, store) = open();
    let batch = dealer_with_denial(&*store, 100);
    let engine = Engine::with_clock(
        Racing::new(store, batch),
        &EngineConfig::without_cache(),
        Arc::new(ManualClock::new(t0())),
    );

    // The batch commits between the assignment read and the grant reads
    assert_eq!(engine.decide(&PrincipalRef::Id(100), "users.create").reason, Reason::DirectDenied);

    engine.store().settle();
    assert_eq!(engine.decide(&PrincipalRef::Id(100), "users.create").reason, Reason::NotGranted);
}

// ============================================================================
// Indexes
// ============================================================================

#[test]
fn email_change_moves_the_index() {
    let (_dir, store) = open();
    store
        .apply(&Mutation::UpsertPrincipal(Principal::new(7).with_email("old@example.com").unwrap()))
        .unwrap();
    store
        .apply(&Mutation::UpsertPrincipal(Principal::new(7).with_email("New@Example.com").unwrap()))
        .unwrap();

    assert!(store.principal_by_email("old@example.com").unwrap().is_none());
    assert_eq!(store.principal_by_email("new@example.com").unwrap().map(|p| p.id), Some(7));

    // Old address is free for someone else
    store
        .apply(&Mutation::UpsertPrincipal(Principal::new(8).with_email("old@example.com").unwrap()))
        .unwrap();
    assert_eq!(store.principal_by_email("old@example.com").unwrap().map(|p| p.id), Some(8));
}

#[test]
fn capability_lookup_by_name() {
    let (_dir, store) = open();
    assert_eq!(store.capability_by_name("users.create").unwrap().map(|c| c.id), Some(USERS_CREATE));
    assert!(store.capability_by_name("users.delete").unwrap().is_none());
}

// ============================================================================
// Transactions and persistence
// ============================================================================

#[test]
fn failed_batch_leaves_no_trace() {
    let (_dir, store) = open();
    let r = store.apply_batch(&[
        Mutation::UpsertPrincipal(Principal::new(50)),
        Mutation::AssignRole(RoleAssignment::primary(50, DEALER)),
        Mutation::SetDirectGrant(DirectGrant::allow(50, 999)),
    ]);
    assert_eq!(r.unwrap_err().kind(), ErrorKind::UnknownCapability);

    assert!(store.principal(50).unwrap().is_none());
    assert!(store.role_assignments(50).unwrap().is_empty());
}

#[test]
fn transact_groups_writes() {
    let (_dir, store) = open();
    store
        .transact(|tx| {
            tx.apply(&Mutation::UpsertPrincipal(Principal::new(60)))?;
            tx.apply(&Mutation::AssignRole(RoleAssignment::primary(60, CUSTOMER)))
        })
        .unwrap();
    assert_eq!(store.role_assignments(60).unwrap().len(), 1);
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authz.mdb");
    {
        let store = LmdbStore::open(&path).unwrap();
        store.apply_batch(&catalog()).unwrap();
        store
            .apply_batch(&[
                Mutation::UpsertPrincipal(Principal::new(9).with_email("p@example.com").unwrap()),
                Mutation::AssignRole(RoleAssignment::primary(9, DEALER)),
            ])
            .unwrap();
    }

    let engine = engine_on(Arc::new(LmdbStore::open(&path).unwrap()));
    assert_eq!(
        engine.list_granted_capabilities(&PrincipalRef::email("p@example.com")).unwrap(),
        vec!["billing.view", "users.create", "vouchers.read"]
    );
}

#[test]
fn clear_all_empties_every_table() {
    let (_dir, store) = open();
    store.apply(&Mutation::UpsertPrincipal(Principal::new(1).with_email("a@example.com").unwrap())).unwrap();
    store.clear_all().unwrap();

    assert!(store.principal(1).unwrap().is_none());
    assert!(store.principal_by_email("a@example.com").unwrap().is_none());
    assert!(store.role(ADMIN).unwrap().is_none());
    assert!(store.capability_by_name("vouchers.read").unwrap().is_none());
    assert!(store.role_grants(ADMIN).unwrap().is_empty());
}
