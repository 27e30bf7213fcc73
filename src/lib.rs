//! Rolegate - permission resolution with leveled roles and direct overrides
//!
//! A principal's effective capabilities are the union of grants from every
//! live role assignment, overridden per capability by live direct grants.
//! Decisions fail closed and carry the reason they were reached.
//!
//! ```no_run
//! use rolegate::{Engine, EngineConfig, LmdbStore, PrincipalRef};
//!
//! let store = LmdbStore::open("./data/rolegate.mdb")?;
//! let engine = Engine::new(store, &EngineConfig::from_env()?);
//! let d = engine.decide(&PrincipalRef::email("Alice@Example.com"), "vouchers.read");
//! println!("{} ({:?})", d.allowed, d.reason);
//! # Ok::<(), rolegate::ResolveError>(())
//! ```

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod db;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod memory;
pub mod model;
pub mod mutation;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

pub use aggregate::{GrantAggregator, GrantEntry, GrantSet, GrantSource};
pub use cache::PermissionCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, EngineConfig};
pub use db::{LmdbSnapshot, LmdbStore, WriteTx};
pub use engine::{Decision, Engine, Explanation, Reason};
pub use error::{ErrorKind, ResolveError, Result};
pub use hierarchy::{level_satisfies, HierarchyResolver, RoleLevel};
pub use memory::{MemorySnapshot, MemoryStore};
pub use model::{
    normalize_email, validate_capability_name, Capability, CapabilityId, DirectGrant, Principal,
    PrincipalId, PrincipalRef, Role, RoleAssignment, RoleGrant, RoleId,
};
pub use mutation::{Invalidation, Mutation};
pub use store::{AuthzAdmin, AuthzRead, AuthzStore};
