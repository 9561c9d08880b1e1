//! Engine configuration
//!
//! Defaults are suitable for production; every field can be overridden from
//! `PETRIFLOW_*` environment variables or read from a YAML/JSON document.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

use crate::CoreError;

/// Tunables for the net runner and the stateless facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of times a single loop-back edge may fire in one case
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    /// Upper bound on OR-join fixed-point rounds per evaluation
    #[serde(default = "default_max_or_join_rounds")]
    pub max_or_join_rounds: u32,

    /// Save a snapshot every this many events (0 disables snapshots)
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
}

fn default_max_loop_iterations() -> u32 {
    10_000
}

fn default_max_or_join_rounds() -> u32 {
    1_024
}

fn default_snapshot_interval() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            max_or_join_rounds: default_max_or_join_rounds(),
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Start with defaults
        let mut config = Self::default();

        if let Some(value) = lookup("PETRIFLOW_MAX_LOOP_ITERATIONS") {
            if let Ok(bound) = value.parse::<u32>() {
                config.max_loop_iterations = bound;
            } else {
                warn!("Invalid PETRIFLOW_MAX_LOOP_ITERATIONS value: {}", value);
            }
        }

        if let Some(value) = lookup("PETRIFLOW_MAX_OR_JOIN_ROUNDS") {
            if let Ok(rounds) = value.parse::<u32>() {
                config.max_or_join_rounds = rounds;
            } else {
                warn!("Invalid PETRIFLOW_MAX_OR_JOIN_ROUNDS value: {}", value);
            }
        }

        if let Some(value) = lookup("PETRIFLOW_SNAPSHOT_INTERVAL") {
            if let Ok(interval) = value.parse::<u64>() {
                config.snapshot_interval = interval;
            } else {
                warn!("Invalid PETRIFLOW_SNAPSHOT_INTERVAL value: {}", value);
            }
        }

        config.validate()?;

        info!(
            max_loop_iterations = config.max_loop_iterations,
            max_or_join_rounds = config.max_or_join_rounds,
            snapshot_interval = config.snapshot_interval,
            "Engine configuration loaded"
        );

        Ok(config)
    }

    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_loop_iterations == 0 {
            return Err(CoreError::ConfigurationError(
                "max_loop_iterations must be greater than zero".to_string(),
            ));
        }
        if self.max_or_join_rounds == 0 {
            return Err(CoreError::ConfigurationError(
                "max_or_join_rounds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_loop_iterations, 10_000);
        assert_eq!(config.snapshot_interval, 50);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::load_from(lookup(&[
            ("PETRIFLOW_MAX_LOOP_ITERATIONS", "25"),
            ("PETRIFLOW_SNAPSHOT_INTERVAL", "0"),
        ]))
        .unwrap();

        assert_eq!(config.max_loop_iterations, 25);
        assert_eq!(config.snapshot_interval, 0);
        assert_eq!(config.max_or_join_rounds, 1_024);
    }

    #[test]
    fn test_invalid_env_value_keeps_default() {
        let config =
            EngineConfig::load_from(lookup(&[("PETRIFLOW_MAX_OR_JOIN_ROUNDS", "many")])).unwrap();
        assert_eq!(config.max_or_join_rounds, 1_024);
    }

    #[test]
    fn test_zero_loop_bound_rejected() {
        let result = EngineConfig::load_from(lookup(&[("PETRIFLOW_MAX_LOOP_ITERATIONS", "0")]));
        assert!(matches!(result, Err(CoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_from_yaml_fills_defaults() {
        let config = EngineConfig::from_yaml("max_loop_iterations: 7\n").unwrap();
        assert_eq!(config.max_loop_iterations, 7);
        assert_eq!(config.max_or_join_rounds, 1_024);
    }
}
