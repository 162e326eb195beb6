//! Sharing configuration.
//!
//! Loaded from the `[sharing]` table of the daemon config; every field has
//! a default so an empty table is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tribe_db::{IsolationLevel, RetryPolicy, TxOptions};

/// Weakest isolation any write path may run at.
pub const MIN_WRITE_ISOLATION: IsolationLevel = IsolationLevel::RepeatableRead;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingConfig {
    /// Transactions for share, unshare, sweep and ownership changes.
    #[serde(default)]
    pub write: TxConfig,
    /// Transactions for listings.
    #[serde(default)]
    pub read: TxConfig,
    /// How often the periodic sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Transaction settings in config-file units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxConfig {
    /// Absent = the default for the path (serializable for writes,
    /// read-committed for reads).
    #[serde(default)]
    pub isolation: Option<IsolationLevel>,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
    /// Overall budget per operation. Absent = only the caller's deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

// Default value functions

fn default_sweep_interval() -> u64 {
    60
}

fn default_statement_timeout() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    10
}

fn default_max_delay() -> u64 {
    500
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            write: TxConfig::default(),
            read: TxConfig::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            isolation: None,
            statement_timeout_ms: default_statement_timeout(),
            timeout_ms: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl TxConfig {
    pub fn to_options(&self, default_isolation: IsolationLevel) -> TxOptions {
        TxOptions {
            isolation: self.isolation.unwrap_or(default_isolation),
            statement_timeout: Duration::from_millis(self.statement_timeout_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
        }
    }
}

impl SharingConfig {
    /// Options for write paths, never weaker than [`MIN_WRITE_ISOLATION`].
    pub fn write_options(&self) -> TxOptions {
        let opts = self.write.to_options(IsolationLevel::Serializable);
        opts.with_isolation(opts.isolation.max(MIN_WRITE_ISOLATION))
    }

    pub fn read_options(&self) -> TxOptions {
        self.read.to_options(IsolationLevel::ReadCommitted)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
