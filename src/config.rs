//! Configuration loading from TOML.
//!
//! Reads `edgescan.toml` and deserializes into strongly-typed structs.
//! Every section and field has a default, so a missing file or a
//! partial file is fine; CLI flags override on top. Exchange
//! credentials never live here — they come from env vars.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::settlement::SettlementConfig;
use crate::valuation::ValuationThresholds;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub valuation: ValuationConfig,
    pub settlement: SettlementSection,
    pub store: StoreConfig,
    pub aliases: AliasConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValuationConfig {
    pub threshold: f64,
    pub max_spread_pct: f64,
    pub min_liquidity: f64,
    pub hours_ahead: i64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        let d = ValuationThresholds::default();
        Self {
            threshold: d.threshold,
            max_spread_pct: d.max_spread_pct,
            min_liquidity: d.min_liquidity,
            hours_ahead: d.hours_ahead,
        }
    }
}

impl ValuationConfig {
    pub fn thresholds(&self) -> ValuationThresholds {
        ValuationThresholds {
            threshold: self.threshold,
            max_spread_pct: self.max_spread_pct,
            min_liquidity: self.min_liquidity,
            hours_ahead: self.hours_ahead,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementSection {
    pub near_before_min: i64,
    pub near_after_min: i64,
    pub max_markets_per_call: usize,
}

impl Default for SettlementSection {
    fn default() -> Self {
        let d = SettlementConfig::default();
        Self {
            near_before_min: d.near_before_min,
            near_after_min: d.near_after_min,
            max_markets_per_call: d.max_markets_per_call,
        }
    }
}

impl SettlementSection {
    pub fn worker_config(&self) -> SettlementConfig {
        SettlementConfig {
            near_before_min: self.near_before_min,
            near_after_min: self.near_after_min,
            max_markets_per_call: self.max_markets_per_call,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_url: "sqlite://edgescan.db".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AliasConfig {
    /// Team inventory file feeding the alias resolver. Absence is
    /// non-fatal: built-in synonyms still apply.
    pub inventory_path: String,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self { inventory_path: "data/soccer_teams.json".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConfig {
    pub out_dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { out_dir: "snapshots".to_string() }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file; a missing file yields the
    /// defaults, a malformed one is an error.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            debug!(path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}
