use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KiteConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub txn: TxnConfig,
}

impl KiteConfig {
    /// Validate all sections. Invalid values are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()?;
        self.txn.validate()?;
        Ok(())
    }
}

/// Recovery scan configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Interval between periodic recovery scans in seconds (default: 120).
    #[serde(default = "default_periodic_recovery_period_secs")]
    pub periodic_recovery_period_secs: u64,
    /// Minimum spacing between consecutive failed-resolution passes over the
    /// same in-doubt record set, in seconds (default: 10). Also the floor
    /// for the coordinator's drain wait.
    #[serde(default = "default_recovery_backoff_period_secs")]
    pub recovery_backoff_period_secs: u64,
}

fn default_periodic_recovery_period_secs() -> u64 {
    120
}

fn default_recovery_backoff_period_secs() -> u64 {
    10
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            periodic_recovery_period_secs: default_periodic_recovery_period_secs(),
            recovery_backoff_period_secs: default_recovery_backoff_period_secs(),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periodic_recovery_period_secs == 0 {
            return Err(ConfigError::InvalidRecoveryPeriod(
                self.periodic_recovery_period_secs,
            ));
        }
        if self.recovery_backoff_period_secs == 0 {
            return Err(ConfigError::InvalidRecoveryBackoff(
                self.recovery_backoff_period_secs,
            ));
        }
        if self.recovery_backoff_period_secs > self.periodic_recovery_period_secs {
            return Err(ConfigError::BackoffExceedsPeriod {
                backoff: self.recovery_backoff_period_secs,
                period: self.periodic_recovery_period_secs,
            });
        }
        Ok(())
    }

    /// Build the immutable runtime policy from this section.
    /// Call `validate()` first; this does not re-check.
    pub fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::new(
            Duration::from_secs(self.periodic_recovery_period_secs),
            Duration::from_secs(self.recovery_backoff_period_secs),
        )
    }
}

/// Transaction defaults section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Timeout applied to transactions begun without an explicit one,
    /// in seconds (default: 300).
    #[serde(default = "default_txn_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_txn_timeout_secs() -> u64 {
    300
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_txn_timeout_secs(),
        }
    }
}

impl TxnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidDefaultTimeout(self.default_timeout_secs));
        }
        Ok(())
    }
}

/// Immutable recovery timing pair. Configured once at startup, read-only
/// afterward; governs both the ledger's scan cadence and the coordinator's
/// drain backoff.
///
/// Duration-typed (rather than raw seconds) so the test harness can run the
/// same code paths at millisecond scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    period: Duration,
    backoff: Duration,
}

impl RecoveryPolicy {
    pub fn new(period: Duration, backoff: Duration) -> Self {
        Self { period, backoff }
    }

    /// Scan-loop tick interval.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Minimum spacing between failed-resolution retries; also the drain
    /// wait floor.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryConfig::default().policy()
    }
}
