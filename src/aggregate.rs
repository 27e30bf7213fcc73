//! Grant aggregation
//!
//! Merges role-derived grants and direct overrides into one mapping of
//! capability name → effective grant. A direct entry always wins over a
//! role entry for the same capability, whether it grants or denies.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Capability, CapabilityId, Principal, PrincipalId, RoleId};
use crate::store::AuthzRead;

/// Where an effective grant came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantSource {
    /// Every live role that grants the capability
    Roles { roles: Vec<RoleId> },
    /// A per-principal override
    Direct { expires_at: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntry {
    pub granted: bool,
    pub source: GrantSource,
}

impl GrantEntry {
    #[inline]
    pub fn is_direct(&self) -> bool {
        matches!(self.source, GrantSource::Direct { .. })
    }
}

/// Aggregated grants for one principal at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSet {
    principal: PrincipalId,
    entries: BTreeMap<String, GrantEntry>,
    computed_at: DateTime<Utc>,
    /// Earliest expiry among the rows that fed this set
    valid_until: Option<DateTime<Utc>>,
}

impl GrantSet {
    pub fn empty(principal: PrincipalId, now: DateTime<Utc>) -> Self {
        GrantSet { principal, entries: BTreeMap::new(), computed_at: now, valid_until: None }
    }

    #[inline]
    pub fn principal(&self) -> PrincipalId {
        self.principal
    }

    /// `None` means no source addressed the capability
    #[inline]
    pub fn get(&self, capability: &str) -> Option<&GrantEntry> {
        self.entries.get(capability)
    }

    /// Absent and explicitly denied both read as not granted
    #[inline]
    pub fn is_granted(&self, capability: &str) -> bool {
        self.entries.get(capability).is_some_and(|e| e.granted)
    }

    /// Granted capability names, sorted
    pub fn granted(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().filter(|(_, e)| e.granted).map(|(n, _)| n.as_str())
    }

    pub fn entries(&self) -> &BTreeMap<String, GrantEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    #[inline]
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    /// False once any contributing assignment or direct grant has expired
    #[inline]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |at| now < at)
    }

    fn bound_by(&mut self, expires_at: Option<DateTime<Utc>>) {
        if let Some(at) = expires_at {
            self.valid_until = Some(self.valid_until.map_or(at, |cur| cur.min(at)));
        }
    }
}

/// Collects grants reachable from a principal
pub struct GrantAggregator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: AuthzRead + ?Sized> GrantAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        GrantAggregator { store }
    }

    pub fn aggregate(&self, principal: &Principal, now: DateTime<Utc>) -> Result<GrantSet> {
        let mut set = GrantSet::empty(principal.id, now);
        if !principal.active {
            return Ok(set);
        }
        let mut catalog = Catalog::new(self.store);

        // Role-derived: every live assignment, primary or not, granted rows on system capabilities
        for assignment in self.store.role_assignments(principal.id)? {
            if !assignment.is_live(now) {
                continue;
            }
            set.bound_by(assignment.expires_at);
            for grant in self.store.role_grants(assignment.role)? {
                if !grant.granted {
                    continue;
                }
                let Some(cap) = catalog.get(grant.capability)? else {
                    warn!(role = grant.role, capability = grant.capability, "role grant references unknown capability");
                    continue;
                };
                if !cap.system {
                    debug!(role = grant.role, capability = %cap.name, "ignoring role grant on custom capability");
                    continue;
                }
                let entry = set.entries.entry(cap.name.clone()).or_insert_with(|| GrantEntry {
                    granted: true,
                    source: GrantSource::Roles { roles: Vec::new() },
                });
                if let GrantSource::Roles { roles } = &mut entry.source {
                    if !roles.contains(&assignment.role) {
                        roles.push(assignment.role);
                    }
                }
            }
        }

        // Direct overrides replace whatever the roles produced
        for grant in self.store.direct_grants(principal.id)? {
            if !grant.is_live(now) {
                continue;
            }
            let Some(cap) = catalog.get(grant.capability)? else {
                warn!(principal = principal.id, capability = grant.capability, "direct grant references unknown capability");
                continue;
            };
            set.bound_by(grant.expires_at);
            set.entries.insert(
                cap.name.clone(),
                GrantEntry { granted: grant.granted, source: GrantSource::Direct { expires_at: grant.expires_at } },
            );
        }

        debug!(principal = principal.id, entries = set.len(), "aggregated grants");
        Ok(set)
    }
}

/// Per-aggregation memo of capability lookups
struct Catalog<'a, S: ?Sized> {
    store: &'a S,
    seen: HashMap<CapabilityId, Option<Capability>>,
}

impl<'a, S: AuthzRead + ?Sized> Catalog<'a, S> {
    fn new(store: &'a S) -> Self {
        Catalog { store, seen: HashMap::new() }
    }

    fn get(&mut self, id: CapabilityId) -> Result<Option<&Capability>> {
        if !self.seen.contains_key(&id) {
            let cap = self.store.capability(id)?;
            self.seen.insert(id, cap);
        }
        Ok(self.seen.get(&id).and_then(Option::as_ref))
    }
}
