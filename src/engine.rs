//! Decision engine
//!
//! Fails closed: every error becomes `allowed = false` with reason `Error`.
//! Lower layers return typed errors and never guess.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregate::{GrantAggregator, GrantEntry, GrantSet, GrantSource};
use crate::cache::{Epoch, PermissionCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, ResolveError, Result};
use crate::hierarchy::{level_satisfies, HierarchyResolver, RoleLevel};
use crate::model::{normalize_email, validate_capability_name, Principal, PrincipalId, PrincipalRef};
use crate::mutation::Mutation;
use crate::store::{AuthzAdmin, AuthzRead, AuthzStore};

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    RoleGranted,
    DirectGranted,
    DirectDenied,
    NotGranted,
    InactivePrincipal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
    /// Set only when `reason` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl Decision {
    fn new(allowed: bool, reason: Reason) -> Self {
        Decision { allowed, reason, error: None }
    }

    pub fn failed(e: &ResolveError) -> Self {
        Decision { allowed: false, reason: Reason::Error, error: Some(e.kind()) }
    }

    fn from_entry(entry: Option<&GrantEntry>) -> Self {
        match entry {
            None => Decision::new(false, Reason::NotGranted),
            Some(e) => match (&e.source, e.granted) {
                (GrantSource::Direct { .. }, true) => Decision::new(true, Reason::DirectGranted),
                (GrantSource::Direct { .. }, false) => Decision::new(false, Reason::DirectDenied),
                (GrantSource::Roles { .. }, true) => Decision::new(true, Reason::RoleGranted),
                (GrantSource::Roles { .. }, false) => Decision::new(false, Reason::NotGranted),
            },
        }
    }
}

/// Audit record for one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub principal: PrincipalRef,
    pub principal_id: Option<PrincipalId>,
    pub capability: String,
    pub decision: Decision,
    /// Missing when the principal could not be resolved or its level lookup failed
    pub primary_level: Option<RoleLevel>,
    /// The aggregated entry behind the decision; `None` means no source addressed it
    pub entry: Option<GrantEntry>,
    /// Whether the grant set came from the cache
    pub cached: bool,
    pub evaluated_at: DateTime<Utc>,
}

struct Evaluation {
    principal: Principal,
    decision: Decision,
    entry: Option<GrantEntry>,
    cached: bool,
}

/// Permission resolution over an injected store
pub struct Engine<S> {
    store: S,
    cache: Option<PermissionCache>,
    clock: Arc<dyn Clock>,
}

/// A store snapshot plus the cache epoch taken just before it was opened
struct Pinned<V> {
    view: V,
    epoch: Option<Epoch>,
}

impl<S: AuthzStore> Engine<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = config.cache.is_active().then(|| PermissionCache::new(&config.cache));
        Engine { store, cache, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> Option<&PermissionCache> {
        self.cache.as_ref()
    }

    /// Check one capability; never fails open
    pub fn decide(&self, principal: &PrincipalRef, capability: &str) -> Decision {
        match self.try_decide(principal, capability) {
            Ok(d) => {
                debug!(%principal, capability, allowed = d.allowed, reason = ?d.reason, "decided");
                d
            }
            Err(e) => {
                log_failure(principal, capability, &e);
                Decision::failed(&e)
            }
        }
    }

    /// Like [`Engine::decide`] but surfaces the typed error
    pub fn try_decide(&self, principal: &PrincipalRef, capability: &str) -> Result<Decision> {
        let now = self.clock.now();
        let pinned = self.pin()?;
        Ok(self.evaluate(&pinned, principal, capability, now)?.decision)
    }

    /// Granted capability names, sorted. Inactive principals get an empty list.
    pub fn list_granted_capabilities(&self, principal: &PrincipalRef) -> Result<Vec<String>> {
        let set = self.grant_set(principal)?;
        Ok(set.granted().map(str::to_string).collect())
    }

    /// The aggregated grant set behind every decision for this principal
    pub fn grant_set(&self, principal: &PrincipalRef) -> Result<Arc<GrantSet>> {
        let now = self.clock.now();
        let pinned = self.pin()?;
        let p = resolve_principal(&pinned.view, principal)?;
        if !p.active {
            return Ok(Arc::new(GrantSet::empty(p.id, now)));
        }
        Ok(self.grants(&pinned, &p, now)?.0)
    }

    /// Decision plus the sources behind it, all read from one snapshot
    pub fn explain(&self, principal: &PrincipalRef, capability: &str) -> Explanation {
        let now = self.clock.now();
        let evaluated = self.pin().and_then(|pinned| {
            let ev = self.evaluate(&pinned, principal, capability, now)?;
            let level = HierarchyResolver::new(&pinned.view).primary_level(&ev.principal, now);
            Ok((ev, level))
        });
        match evaluated {
            Ok((ev, level)) => {
                let primary_level = match level {
                    Ok(level) => Some(level),
                    Err(e) => {
                        warn!(%principal, error = %e, "primary level unavailable for explanation");
                        None
                    }
                };
                Explanation {
                    principal: principal.clone(),
                    principal_id: Some(ev.principal.id),
                    capability: capability.to_string(),
                    decision: ev.decision,
                    primary_level,
                    entry: ev.entry,
                    cached: ev.cached,
                    evaluated_at: now,
                }
            }
            Err(e) => {
                log_failure(principal, capability, &e);
                Explanation {
                    principal: principal.clone(),
                    principal_id: None,
                    capability: capability.to_string(),
                    decision: Decision::failed(&e),
                    primary_level: None,
                    entry: None,
                    cached: false,
                    evaluated_at: now,
                }
            }
        }
    }

    pub fn primary_level(&self, principal: &PrincipalRef) -> Result<RoleLevel> {
        let view = self.store.snapshot()?;
        let p = resolve_principal(&view, principal)?;
        HierarchyResolver::new(&view).primary_level(&p, self.clock.now())
    }

    /// Level eligibility check ("at least as privileged as `max_level`"); errors deny
    pub fn satisfies_level(&self, principal: &PrincipalRef, max_level: u32) -> bool {
        match self.primary_level(principal) {
            Ok(level) => level_satisfies(max_level, level),
            Err(e) => {
                warn!(%principal, max_level, error = %e, "level check failed closed");
                false
            }
        }
    }

    /// Hook for the administrative write path: drop whatever the mutation can affect
    pub fn notify(&self, mutation: &Mutation) {
        if let Some(cache) = &self.cache {
            cache.invalidate(mutation.invalidation());
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    /// Epoch first, then the snapshot, so a write notified in between rejects this read's fill
    fn pin(&self) -> Result<Pinned<S::Snapshot<'_>>> {
        let epoch = self.cache.as_ref().map(PermissionCache::epoch);
        Ok(Pinned { view: self.store.snapshot()?, epoch })
    }

    fn evaluate<V: AuthzRead>(
        &self,
        pinned: &Pinned<V>,
        principal: &PrincipalRef,
        capability: &str,
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        validate_capability_name(capability)?;
        let p = resolve_principal(&pinned.view, principal)?;
        if !p.active {
            return Ok(Evaluation {
                principal: p,
                decision: Decision::new(false, Reason::InactivePrincipal),
                entry: None,
                cached: false,
            });
        }
        if pinned.view.capability_by_name(capability)?.is_none() {
            return Err(ResolveError::UnknownCapability(capability.to_string()));
        }
        let (set, cached) = self.grants(pinned, &p, now)?;
        let entry = set.get(capability).cloned();
        Ok(Evaluation { principal: p, decision: Decision::from_entry(entry.as_ref()), entry, cached })
    }

    /// Cache-checked aggregation for an active principal; the flag tells whether it was a hit
    fn grants<V: AuthzRead>(
        &self,
        pinned: &Pinned<V>,
        p: &Principal,
        now: DateTime<Utc>,
    ) -> Result<(Arc<GrantSet>, bool)> {
        let aggregator = GrantAggregator::new(&pinned.view);
        let (Some(cache), Some(epoch)) = (&self.cache, pinned.epoch) else {
            return Ok((Arc::new(aggregator.aggregate(p, now)?), false));
        };
        if let Some(set) = cache.get(p.id, now) {
            debug!(principal = p.id, "grant cache hit");
            return Ok((set, true));
        }
        let set = Arc::new(aggregator.aggregate(p, now)?);
        cache.insert(Arc::clone(&set), epoch);
        Ok((set, false))
    }
}

impl<S: AuthzStore + AuthzAdmin> Engine<S> {
    /// Apply an administrative batch on behalf of `actor`.
    ///
    /// The actor must be granted `capability`; otherwise nothing is written and
    /// the denying decision is returned. Applied mutations are notified.
    pub fn apply_as(&self, actor: &PrincipalRef, capability: &str, mutations: &[Mutation]) -> Result<Decision> {
        let decision = self.decide(actor, capability);
        if !decision.allowed {
            warn!(%actor, capability, reason = ?decision.reason, "administrative batch refused");
            return Ok(decision);
        }
        self.store.apply_batch(mutations)?;
        for m in mutations {
            self.notify(m);
        }
        info!(%actor, applied = mutations.len(), "administrative batch applied");
        Ok(decision)
    }
}

fn resolve_principal<V: AuthzRead>(view: &V, principal: &PrincipalRef) -> Result<Principal> {
    let found = match principal {
        PrincipalRef::Id(id) => view.principal(*id)?,
        PrincipalRef::Email(email) => view.principal_by_email(&normalize_email(email)?)?,
    };
    found.ok_or_else(|| ResolveError::UnknownPrincipal(principal.to_string()))
}

fn log_failure(principal: &PrincipalRef, capability: &str, e: &ResolveError) {
    match e {
        ResolveError::StoreUnavailable(_) | ResolveError::Inconsistent(_) => {
            error!(%principal, capability, error = %e, "authorization check failed closed")
        }
        _ => warn!(%principal, capability, error = %e, "authorization check denied"),
    }
}
