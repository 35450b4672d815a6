//! Runtime configuration.
//!
//! Every knob can be given as a command-line flag or through a `BANKLEDGER_*`
//! environment variable (a `.env` file is loaded at startup).

use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::Args;

use crate::domain::LockoutPolicy;

/// Connection pool settings for the SQLite store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub max_connections: u32,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout: StdDuration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: StdDuration::from_millis(5_000),
        }
    }
}

/// Settings for the balance-mutation protocol.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Attempts made for one deposit/withdrawal when the store reports contention.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: StdDuration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: StdDuration::from_millis(20),
        }
    }
}

/// Settings for login, lockout and password hashing.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub lockout: LockoutPolicy,
    pub session_ttl: Duration,
    /// Argon2id memory cost in KiB.
    pub hash_memory_kib: u32,
    /// Argon2id iteration count.
    pub hash_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy::default(),
            session_ttl: Duration::hours(12),
            hash_memory_kib: 19_456,
            hash_iterations: 2,
        }
    }
}

/// Everything the services need, assembled once at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub auth: AuthConfig,
}

/// Command-line/environment view of [`Settings`].
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Maximum pooled database connections
    #[arg(long, env = "BANKLEDGER_POOL_SIZE", default_value_t = 8, global = true)]
    pub pool_size: u32,

    /// Milliseconds to wait on a locked database
    #[arg(long, env = "BANKLEDGER_BUSY_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub busy_timeout_ms: u64,

    /// Attempts per deposit/withdrawal under storage contention
    #[arg(long, env = "BANKLEDGER_MAX_ATTEMPTS", default_value_t = 5, global = true)]
    pub max_attempts: u32,

    /// Failed logins before an account is locked
    #[arg(long, env = "BANKLEDGER_LOCKOUT_THRESHOLD", default_value_t = 5, global = true)]
    pub lockout_threshold: i64,

    /// Minutes a locked user must wait
    #[arg(long, env = "BANKLEDGER_LOCKOUT_MINUTES", default_value_t = 15, global = true)]
    pub lockout_minutes: i64,

    /// Hours a login session stays valid
    #[arg(long, env = "BANKLEDGER_SESSION_TTL_HOURS", default_value_t = 12, global = true)]
    pub session_ttl_hours: i64,
}

impl SettingsArgs {
    pub fn to_settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            storage: StorageConfig {
                max_connections: self.pool_size.max(1),
                busy_timeout: StdDuration::from_millis(self.busy_timeout_ms),
            },
            ledger: LedgerConfig {
                max_attempts: self.max_attempts.max(1),
                ..defaults.ledger
            },
            auth: AuthConfig {
                lockout: LockoutPolicy {
                    max_failed_attempts: self.lockout_threshold.max(1),
                    lockout: Duration::minutes(self.lockout_minutes),
                },
                session_ttl: Duration::hours(self.session_ttl_hours),
                ..defaults.auth
            },
        }
    }
}
