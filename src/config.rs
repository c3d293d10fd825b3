//! Ledger configuration.
//!
//! Loaded from environment variables with sensible defaults, or built in
//! code with the `with_*` methods.

use std::env;
use std::time::Duration;

/// Default cap on members per circle.
pub const DEFAULT_MAX_MEMBERS: usize = 12;

/// Default number of join code draws before giving up.
pub const DEFAULT_JOIN_CODE_ATTEMPTS: u32 = 10;

/// Default number of pooled database connections.
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Tunables for the circle ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum members a circle accepts.
    pub max_members: usize,
    /// Join code draws before failing with `CodeExhausted`.
    pub join_code_attempts: u32,
    /// Bound on lock acquisition and on each storage call.
    pub storage_timeout: Duration,
    /// How long `SQLite` waits on a locked database.
    pub busy_timeout: Duration,
    /// Connections in the storage pool.
    pub pool_size: u32,
    /// Extra attempts for reads that hit a storage timeout.
    pub read_retries: u32,
    /// Pause between read attempts.
    pub retry_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_members: DEFAULT_MAX_MEMBERS,
            join_code_attempts: DEFAULT_JOIN_CODE_ATTEMPTS,
            storage_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(2),
            pool_size: DEFAULT_POOL_SIZE,
            read_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PADISAVE_MAX_MEMBERS` (default: 12)
    /// - `PADISAVE_JOIN_CODE_ATTEMPTS` (default: 10)
    /// - `PADISAVE_STORAGE_TIMEOUT_MS` (default: 5000)
    /// - `PADISAVE_BUSY_TIMEOUT_MS` (default: 2000)
    /// - `PADISAVE_POOL_SIZE` (default: 8)
    /// - `PADISAVE_READ_RETRIES` (default: 3)
    /// - `PADISAVE_RETRY_BACKOFF_MS` (default: 50)
    ///
    /// Missing or unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_members: env_parse("PADISAVE_MAX_MEMBERS").unwrap_or(defaults.max_members),
            join_code_attempts: env_parse("PADISAVE_JOIN_CODE_ATTEMPTS")
                .unwrap_or(defaults.join_code_attempts),
            storage_timeout: env_parse("PADISAVE_STORAGE_TIMEOUT_MS")
                .map_or(defaults.storage_timeout, Duration::from_millis),
            busy_timeout: env_parse("PADISAVE_BUSY_TIMEOUT_MS")
                .map_or(defaults.busy_timeout, Duration::from_millis),
            pool_size: env_parse::<u32>("PADISAVE_POOL_SIZE")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.pool_size),
            read_retries: env_parse("PADISAVE_READ_RETRIES").unwrap_or(defaults.read_retries),
            retry_backoff: env_parse("PADISAVE_RETRY_BACKOFF_MS")
                .map_or(defaults.retry_backoff, Duration::from_millis),
        }
    }

    /// Sets the member cap.
    #[must_use]
    pub const fn with_max_members(mut self, max_members: usize) -> Self {
        self.max_members = max_members;
        self
    }

    /// Sets the join code retry budget.
    #[must_use]
    pub const fn with_join_code_attempts(mut self, attempts: u32) -> Self {
        self.join_code_attempts = attempts;
        self
    }

    /// Sets the storage timeout.
    #[must_use]
    pub const fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Sets the connection pool size. Zero is treated as one.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = if pool_size == 0 { 1 } else { pool_size };
        self
    }

    /// Sets the read retry count and backoff.
    #[must_use]
    pub const fn with_read_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.read_retries = retries;
        self.retry_backoff = backoff;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
