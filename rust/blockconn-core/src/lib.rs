pub mod config;
pub mod cost;
pub mod db;
pub mod error;
pub mod geometry;
pub mod index;
pub mod models;
pub mod neighbors;
pub mod pipeline;
pub mod reclassify;
pub mod selector;
pub mod writer;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::BuildConfig;
pub use db::Database;
pub use error::{Error, Result};
pub use models::{BlockConnection, CensusBlock, GraphStage, PairCosts, StressRegime};
pub use pipeline::{Pipeline, RunOptions, RunSummary};

pub fn version() -> &'static str { env!("CARGO_PKG_VERSION") }

pub fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}
