//! Per-principal grant set cache
//!
//! Entries are immutable `Arc<GrantSet>` values replaced whole, so readers
//! never see a partially built set. Every invalidation bumps an epoch; an
//! entry populated before the latest invalidation that covers it is never
//! served, even if its insert raced with the invalidation.
//!
//! Per-principal floors are never evicted silently. When there are more of
//! them than the cache has entries, they are folded into the global floor,
//! which costs one whole-cache miss instead of a stale hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use moka::sync::Cache;
use tracing::{debug, info};

use crate::aggregate::GrantSet;
use crate::config::CacheConfig;
use crate::model::PrincipalId;
use crate::mutation::Invalidation;

#[derive(Clone)]
struct Entry {
    set: Arc<GrantSet>,
    epoch: u64,
}

/// Token taken before reading the store; pass it back to [`PermissionCache::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

pub struct PermissionCache {
    entries: Cache<PrincipalId, Entry>,
    /// Epoch of the last invalidation touching each principal
    floors: RwLock<HashMap<PrincipalId, u64>>,
    max_floors: usize,
    /// Epoch of the last whole-cache invalidation, or of the newest folded floor
    global_floor: AtomicU64,
    epoch: AtomicU64,
    ttl: Duration,
}

impl PermissionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = config.ttl();
        PermissionCache {
            entries: Cache::builder().max_capacity(config.max_entries).time_to_live(ttl).build(),
            floors: RwLock::new(HashMap::new()),
            max_floors: usize::try_from(config.max_entries).unwrap_or(usize::MAX).max(1),
            global_floor: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::zero()),
        }
    }

    /// Current epoch, to be taken before the store is read
    #[inline]
    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch.load(Ordering::SeqCst))
    }

    /// A fresh grant set for the principal, if one is cached
    pub fn get(&self, principal: PrincipalId, now: DateTime<Utc>) -> Option<Arc<GrantSet>> {
        let entry = self.entries.get(&principal)?;
        if entry.epoch < self.floor(principal) {
            debug!(principal, "cached grants predate an invalidation");
            self.entries.invalidate(&principal);
            return None;
        }
        if now - entry.set.computed_at() >= self.ttl || !entry.set.is_fresh(now) {
            debug!(principal, "cached grants expired");
            self.entries.invalidate(&principal);
            return None;
        }
        Some(entry.set)
    }

    /// Store a grant set computed after `epoch` was taken
    pub fn insert(&self, set: Arc<GrantSet>, epoch: Epoch) {
        self.entries.insert(set.principal(), Entry { set, epoch: epoch.0 });
    }

    pub fn invalidate(&self, scope: Invalidation) {
        match scope {
            Invalidation::Principal(p) => self.invalidate_principal(p),
            Invalidation::All => self.invalidate_all(),
        }
    }

    pub fn invalidate_principal(&self, principal: PrincipalId) {
        let e = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut floors = self.floors.write().unwrap_or_else(|p| p.into_inner());
            floors.insert(principal, e);
            if floors.len() > self.max_floors {
                // Dropped floors are covered by the raised global floor
                self.global_floor.fetch_max(e, Ordering::SeqCst);
                floors.clear();
                debug!(epoch = e, "folded invalidation floors into the global floor");
            }
        }
        self.entries.invalidate(&principal);
        debug!(principal, epoch = e, "invalidated cached grants");
    }

    pub fn invalidate_all(&self) {
        let e = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut floors = self.floors.write().unwrap_or_else(|p| p.into_inner());
            self.global_floor.fetch_max(e, Ordering::SeqCst);
            floors.clear();
        }
        self.entries.invalidate_all();
        info!(epoch = e, "invalidated all cached grants");
    }

    /// Lowest epoch a cached entry for `principal` may carry
    fn floor(&self, principal: PrincipalId) -> u64 {
        let floors = self.floors.read().unwrap_or_else(|p| p.into_inner());
        let own = floors.get(&principal).copied().unwrap_or(0);
        own.max(self.global_floor.load(Ordering::SeqCst))
    }
}
