//! Role hierarchy resolution
//!
//! Lower numeric level means more authority, so "at least as privileged as
//! level N" is `level <= N`. Only the primary, non-expired assignment counts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Result};
use crate::model::{Principal, Role};
use crate::store::AuthzRead;

/// Level of a principal's primary role, or its absence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum RoleLevel {
    NoRole,
    Level(u32),
}

impl RoleLevel {
    #[inline]
    pub fn level(self) -> Option<u32> {
        match self {
            RoleLevel::NoRole => None,
            RoleLevel::Level(l) => Some(l),
        }
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleLevel::NoRole => write!(f, "no role"),
            RoleLevel::Level(l) => write!(f, "level {}", l),
        }
    }
}

/// True iff `actual` is a level no greater than `required_max_level`
#[inline]
pub fn level_satisfies(required_max_level: u32, actual: RoleLevel) -> bool {
    match actual {
        RoleLevel::NoRole => false,
        RoleLevel::Level(l) => l <= required_max_level,
    }
}

/// Stateless primary-role lookup over a store
pub struct HierarchyResolver<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: AuthzRead + ?Sized> HierarchyResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        HierarchyResolver { store }
    }

    /// The principal's primary, non-expired role. Inactive principals have none.
    pub fn primary_role(&self, principal: &Principal, now: DateTime<Utc>) -> Result<Option<Role>> {
        if !principal.active {
            return Ok(None);
        }
        let mut primaries = self
            .store
            .role_assignments(principal.id)?
            .into_iter()
            .filter(|a| a.is_primary && a.is_live(now));
        let Some(primary) = primaries.next() else {
            return Ok(None);
        };
        if let Some(other) = primaries.next() {
            return Err(ResolveError::Inconsistent(format!(
                "principal {} has several primary roles ({}, {})",
                principal.id, primary.role, other.role
            )));
        }
        match self.store.role(primary.role)? {
            Some(role) => Ok(Some(role)),
            None => Err(ResolveError::Inconsistent(format!(
                "principal {} is assigned missing role {}",
                principal.id, primary.role
            ))),
        }
    }

    pub fn primary_level(&self, principal: &Principal, now: DateTime<Utc>) -> Result<RoleLevel> {
        Ok(self
            .primary_role(principal, now)?
            .map_or(RoleLevel::NoRole, |r| RoleLevel::Level(r.level)))
    }
}
