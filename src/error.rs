//! Error types for rolegate

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`ResolveError`], carried on fail-closed decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    StoreUnavailable,
    UnknownPrincipal,
    UnknownCapability,
    InvalidInput,
    Inconsistent,
}

/// The main error type for resolution and store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Connection, transaction or (de)serialization failure in the backing store
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// No principal matches the given id or email
    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),
    /// Capability name is well formed but absent from the catalog
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    /// Empty or malformed identifier
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Store contents violate an invariant (e.g. two primary roles)
    #[error("inconsistent store: {0}")]
    Inconsistent(String),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            ResolveError::UnknownPrincipal(_) => ErrorKind::UnknownPrincipal,
            ResolveError::UnknownCapability(_) => ErrorKind::UnknownCapability,
            ResolveError::InvalidInput(_) => ErrorKind::InvalidInput,
            ResolveError::Inconsistent(_) => ErrorKind::Inconsistent,
        }
    }
}

/// Result type alias for rolegate operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Convert any backend error into a store failure
pub fn err<E: std::error::Error>(e: E) -> ResolveError {
    ResolveError::StoreUnavailable(e.to_string())
}
