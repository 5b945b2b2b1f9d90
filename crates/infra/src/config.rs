//! Ledger configuration.
//!
//! Values come from `BATCHLEDGER_*` environment variables, falling back to
//! [`LedgerConfig::default`] for anything unset.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STRATEGY_VAR: &str = "BATCHLEDGER_DEFAULT_STRATEGY";
pub const RESERVATION_TTL_VAR: &str = "BATCHLEDGER_RESERVATION_TTL_SECS";
pub const MAX_COMMIT_ATTEMPTS_VAR: &str = "BATCHLEDGER_MAX_COMMIT_ATTEMPTS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected} (got '{value}')")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Strategy used when a caller does not name one.
    pub default_strategy: String,
    /// Lifetime of a reservation opened without an explicit expiry.
    #[serde(with = "ttl_secs")]
    pub reservation_ttl: Duration,
    /// Commit attempts per service call before a version conflict surfaces.
    pub max_commit_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_strategy: "fifo".to_string(),
            reservation_ttl: Duration::from_secs(1800),
            max_commit_attempts: 3,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(strategy) = lookup(DEFAULT_STRATEGY_VAR) {
            let strategy = strategy.trim().to_ascii_lowercase();
            if strategy.is_empty() {
                return Err(ConfigError::Invalid {
                    var: DEFAULT_STRATEGY_VAR,
                    expected: "a strategy name",
                    value: strategy,
                });
            }
            config.default_strategy = strategy;
        }

        if let Some(raw) = lookup(RESERVATION_TTL_VAR) {
            let secs = raw.trim().parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| ConfigError::Invalid {
                var: RESERVATION_TTL_VAR,
                expected: "a positive number of seconds",
                value: raw.clone(),
            })?;
            config.reservation_ttl = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(MAX_COMMIT_ATTEMPTS_VAR) {
            let attempts = raw.trim().parse::<u32>().ok().filter(|n| *n >= 1).ok_or_else(|| ConfigError::Invalid {
                var: MAX_COMMIT_ATTEMPTS_VAR,
                expected: "an integer >= 1",
                value: raw.clone(),
            })?;
            config.max_commit_attempts = attempts;
        }

        Ok(config)
    }

    pub fn with_default_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.default_strategy = strategy.into();
        self
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }
}

mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
