//! Limits, defaults and environment variable names

/// Longest accepted capability name, in bytes
pub const MAX_CAPABILITY_NAME_LEN: usize = 128;

/// Longest accepted email address, in bytes (RFC 5321 path limit)
pub const MAX_EMAIL_LEN: usize = 254;

// Cache defaults
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

// Environment variables read by `EngineConfig::from_env`
pub const ENV_CACHE_ENABLED: &str = "ROLEGATE_CACHE_ENABLED";
pub const ENV_CACHE_TTL_SECS: &str = "ROLEGATE_CACHE_TTL_SECS";
pub const ENV_CACHE_CAPACITY: &str = "ROLEGATE_CACHE_CAPACITY";
pub const ENV_ADMIN_CAPABILITY: &str = "ROLEGATE_ADMIN_CAPABILITY";

/// Capability an actor needs to submit administrative mutations
pub const DEFAULT_ADMIN_CAPABILITY: &str = "authz.admin";

/// LMDB map size for `LmdbStore::open`
pub const LMDB_MAP_SIZE: usize = 1 << 30;

/// Number of named LMDB databases used by `LmdbStore`
pub const LMDB_MAX_DBS: u32 = 9;

/// Upper bound applied to configured cache TTLs
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;
