//! Authorization store entities and identifier validation
//!
//! Every edge is keyed on stable numeric ids. Names and emails are lookup
//! attributes only: emails are lower-cased at the boundary, capability names
//! match exactly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_CAPABILITY_NAME_LEN, MAX_EMAIL_LEN};
use crate::error::{ResolveError, Result};

pub type PrincipalId = u64;
pub type RoleId = u64;
pub type CapabilityId = u64;

/// A user identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    /// Lower-cased email, if the principal can be looked up by one
    pub email: Option<String>,
    pub active: bool,
}

impl Principal {
    /// Active principal without an email
    pub fn new(id: PrincipalId) -> Self {
        Principal { id, email: None, active: true }
    }

    /// Attach an email, normalized to lower case
    pub fn with_email(mut self, email: &str) -> Result<Self> {
        self.email = Some(normalize_email(email)?);
        Ok(self)
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A named, leveled capability bundle. Lower level means more authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub level: u32,
}

impl Role {
    pub fn new(id: RoleId, name: &str, level: u32) -> Self {
        Role { id, name: name.to_string(), level }
    }
}

/// A named action identifier from the externally seeded catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub name: String,
    pub category: Option<String>,
    /// System-defined capabilities are the only ones roles can grant
    pub system: bool,
}

impl Capability {
    pub fn system(id: CapabilityId, name: &str) -> Self {
        Capability { id, name: name.to_string(), category: None, system: true }
    }

    pub fn custom(id: CapabilityId, name: &str) -> Self {
        Capability { id, name: name.to_string(), category: None, system: false }
    }

    pub fn in_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

/// (role, capability) -> granted. At most one row per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: RoleId,
    pub capability: CapabilityId,
    pub granted: bool,
}

/// Per-principal override, grant or explicit denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectGrant {
    pub principal: PrincipalId,
    pub capability: CapabilityId,
    pub granted: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DirectGrant {
    pub fn allow(principal: PrincipalId, capability: CapabilityId) -> Self {
        DirectGrant { principal, capability, granted: true, expires_at: None }
    }

    pub fn deny(principal: PrincipalId, capability: CapabilityId) -> Self {
        DirectGrant { principal, capability, granted: false, expires_at: None }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    #[inline]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        is_live(self.expires_at, now)
    }
}

/// (principal, role) edge; at most one primary per principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub principal: PrincipalId,
    pub role: RoleId,
    pub is_primary: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn primary(principal: PrincipalId, role: RoleId) -> Self {
        RoleAssignment { principal, role, is_primary: true, expires_at: None }
    }

    pub fn secondary(principal: PrincipalId, role: RoleId) -> Self {
        RoleAssignment { principal, role, is_primary: false, expires_at: None }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    #[inline]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        is_live(self.expires_at, now)
    }
}

/// A row is live until its expiry instant; `expires_at <= now` is expired
#[inline]
pub fn is_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map_or(true, |at| at > now)
}

/// How a caller identifies the principal being checked
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalRef {
    Id(PrincipalId),
    Email(String),
}

impl PrincipalRef {
    pub fn email(email: &str) -> Self {
        PrincipalRef::Email(email.to_string())
    }

    /// Parse a path-style identifier: anything with `@` is an email, otherwise a numeric id
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('@') {
            return Ok(PrincipalRef::Email(normalize_email(s)?));
        }
        s.parse::<PrincipalId>()
            .map(PrincipalRef::Id)
            .map_err(|_| ResolveError::InvalidInput(format!("'{}' is neither an id nor an email", s)))
    }
}

impl From<PrincipalId> for PrincipalRef {
    fn from(id: PrincipalId) -> Self {
        PrincipalRef::Id(id)
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalRef::Id(id) => write!(f, "{}", id),
            PrincipalRef::Email(email) => write!(f, "{}", email),
        }
    }
}

/// Trim and lower-case an email, rejecting anything without a single `@`
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ResolveError::InvalidInput("Email cannot be empty".into()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(ResolveError::InvalidInput(format!(
            "Email too long: {} bytes (max {})",
            email.len(),
            MAX_EMAIL_LEN
        )));
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            if email.chars().any(char::is_whitespace) {
                return Err(ResolveError::InvalidInput(format!("Email '{}' contains whitespace", email)));
            }
            Ok(email.to_lowercase())
        }
        _ => Err(ResolveError::InvalidInput(format!("Malformed email '{}'", email))),
    }
}

/// Capability names: ASCII alphanumerics plus `.`, `_`, `-`, `:`
pub fn validate_capability_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ResolveError::InvalidInput("Capability name cannot be empty".into()));
    }
    if name.len() > MAX_CAPABILITY_NAME_LEN {
        return Err(ResolveError::InvalidInput(format!(
            "Capability name too long: {} bytes (max {})",
            name.len(),
            MAX_CAPABILITY_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':')))
    {
        return Err(ResolveError::InvalidInput(format!(
            "Capability name '{}' contains invalid character {:?}",
            name, c
        )));
    }
    Ok(())
}
