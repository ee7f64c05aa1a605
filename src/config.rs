use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collector::DEFAULT_COLLECTOR_INTERVAL_SECS;
use crate::in_order::DEFAULT_IN_ORDER_DELAY_SECS;

/// Scoring service settings, every key optional in the TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// How long a fix is held for stragglers before it is scored
    #[serde(default = "default_in_order_delay")]
    pub in_order_delay_secs: i64,
    #[serde(default = "default_collector_interval")]
    pub collector_interval_secs: u64,
    /// How often the class loop advances its pipelines
    #[serde(default = "default_pump_interval")]
    pub pump_interval_ms: u64,
    #[serde(default = "default_fix_queue_size")]
    pub fix_queue_size: usize,
    #[serde(default = "default_pilot_cache_ttl")]
    pub pilot_cache_ttl_secs: u64,
    #[serde(default = "default_pilot_cache_capacity")]
    pub pilot_cache_capacity: u64,
}

fn default_in_order_delay() -> i64 {
    DEFAULT_IN_ORDER_DELAY_SECS
}

fn default_collector_interval() -> u64 {
    DEFAULT_COLLECTOR_INTERVAL_SECS
}

fn default_pump_interval() -> u64 {
    1000
}

fn default_fix_queue_size() -> usize {
    1000
}

fn default_pilot_cache_ttl() -> u64 {
    300
}

fn default_pilot_cache_capacity() -> u64 {
    2000
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            in_order_delay_secs: default_in_order_delay(),
            collector_interval_secs: default_collector_interval(),
            pump_interval_ms: default_pump_interval(),
            fix_queue_size: default_fix_queue_size(),
            pilot_cache_ttl_secs: default_pilot_cache_ttl(),
            pilot_cache_capacity: default_pilot_cache_capacity(),
        }
    }
}

impl ScoringConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: ScoringConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Defaults when no path is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn collector_interval(&self) -> Duration {
        Duration::from_secs(self.collector_interval_secs.max(1))
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }

    pub fn pilot_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pilot_cache_ttl_secs)
    }
}
