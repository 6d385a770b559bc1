use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::StressRegime;

/// Default neighbor search radius in CRS units (2680 ft, about half a mile).
pub const DEFAULT_SEARCH_RADIUS: f64 = 2680.0;
/// Low-stress cost may exceed the high-stress cost by up to this factor and still count as low-stress.
pub const DEFAULT_COST_RATIO_THRESHOLD: f64 = 1.25;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 4096;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub search_radius: f64,
    pub cost_ratio_threshold: f64,
    /// Number of concurrent source workers.
    pub workers: usize,
    /// Emit a (block, block) row for every source.
    pub include_self_pairs: bool,
    /// Reachability relation that supplies `high_stress_cost`.
    pub high_stress_source: StressRegime,
    /// Per-worker LRU capacity for decoded target blocks.
    pub block_cache_capacity: usize,
    pub busy_timeout_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            search_radius: DEFAULT_SEARCH_RADIUS,
            cost_ratio_threshold: DEFAULT_COST_RATIO_THRESHOLD,
            workers: 1,
            include_self_pairs: false,
            high_stress_source: StressRegime::HighStress,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl BuildConfig {
    /// Parse a JSON config file; omitted fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply environment overrides. Invalid values are rejected rather than ignored.
    ///
    /// Variables:
    /// - BLOCKCONN_SEARCH_RADIUS: float, CRS units
    /// - BLOCKCONN_COST_RATIO: float
    /// - BLOCKCONN_WORKERS: integer >= 1
    /// - BLOCKCONN_INCLUDE_SELF_PAIRS: "1"/"0"
    /// - BLOCKCONN_HIGH_STRESS_SOURCE: "high_stress" or "low_stress"
    /// - BLOCKCONN_BLOCK_CACHE: integer
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|k| env::var(k).ok())
    }

    fn with_vars<F>(mut self, get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, v: &str) -> Result<T> {
            v.trim().parse::<T>().map_err(|_| Error::InvalidConfig(format!("{name}={v:?}")))
        }
        if let Some(v) = get("BLOCKCONN_SEARCH_RADIUS") {
            self.search_radius = parse("BLOCKCONN_SEARCH_RADIUS", &v)?;
        }
        if let Some(v) = get("BLOCKCONN_COST_RATIO") {
            self.cost_ratio_threshold = parse("BLOCKCONN_COST_RATIO", &v)?;
        }
        if let Some(v) = get("BLOCKCONN_WORKERS") {
            self.workers = parse("BLOCKCONN_WORKERS", &v)?;
        }
        if let Some(v) = get("BLOCKCONN_INCLUDE_SELF_PAIRS") {
            self.include_self_pairs = v.trim() != "0" && !v.trim().eq_ignore_ascii_case("false");
        }
        if let Some(v) = get("BLOCKCONN_HIGH_STRESS_SOURCE") {
            self.high_stress_source = v.parse().map_err(Error::InvalidConfig)?;
        }
        if let Some(v) = get("BLOCKCONN_BLOCK_CACHE") {
            self.block_cache_capacity = parse("BLOCKCONN_BLOCK_CACHE", &v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.search_radius.is_finite() || self.search_radius < 0.0 {
            return Err(Error::InvalidConfig(format!("search_radius must be finite and >= 0, got {}", self.search_radius)));
        }
        if !self.cost_ratio_threshold.is_finite() || self.cost_ratio_threshold <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "cost_ratio_threshold must be finite and > 0, got {}",
                self.cost_ratio_threshold
            )));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be >= 1".into()));
        }
        Ok(())
    }
}
