//! Engine configuration
//!
//! Per-component config structs carry their own defaults; this module
//! aggregates them and loads overrides from an optional `custody.toml`
//! plus `ESCROW_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::scheduler::AutoReleaseSchedulerConfig;
use crate::service::EscrowServiceConfig;
use crate::EscrowResult;

/// Aggregate configuration for the custody engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub service: EscrowServiceConfig,
    pub scheduler: AutoReleaseSchedulerConfig,
}

impl EngineConfig {
    /// Load `custody.toml` if present, then apply environment overrides,
    /// e.g. `ESCROW_SCHEDULER__SWEEP_INTERVAL_SECS=60`
    pub fn load() -> EscrowResult<Self> {
        Self::load_from("custody")
    }

    /// Load from a named config file basename; missing files fall back to
    /// the compiled defaults
    pub fn load_from(basename: &str) -> EscrowResult<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(basename).required(false))
            .add_source(config::Environment::with_prefix("ESCROW").separator("__"))
            .build()
            .map_err(|err| EscrowError::config(err.to_string()))?
            .try_deserialize()
            .map_err(|err| EscrowError::config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load_from("no-such-config-file").unwrap();

        assert_eq!(config.service.min_amount, Decimal::from(10));
        assert_eq!(config.service.max_amount, Decimal::from(100_000));
        assert_eq!(config.service.max_update_retries, 3);
        assert_eq!(config.scheduler.sweep_interval_secs, 300);
    }
}
