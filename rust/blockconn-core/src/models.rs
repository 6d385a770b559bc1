use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::MultiPolygon;

pub type BlockId = String;
pub type RoadId = i64;

/// A census block as supplied by upstream ingestion. `row_id` keys the R*Tree.
#[derive(Clone, Debug, PartialEq)]
pub struct CensusBlock {
    pub row_id: i64,
    pub block_id: BlockId,
    pub geom: MultiPolygon<f64>,
    /// Sorted, deduplicated road segment ids touching the block.
    pub road_ids: Vec<RoadId>,
}

/// One output row of the connectivity graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockConnection {
    pub source_block_id: BlockId,
    pub target_block_id: BlockId,
    pub low_stress: bool,
    pub low_stress_cost: Option<f64>,
    pub high_stress: bool,
    pub high_stress_cost: Option<f64>,
}

impl BlockConnection {
    /// Row as first written: not yet classified low-stress, always high-stress reachable.
    pub fn unclassified(source: &str, target: &str, costs: PairCosts) -> Self {
        Self {
            source_block_id: source.to_string(),
            target_block_id: target.to_string(),
            low_stress: false,
            low_stress_cost: costs.low_stress,
            high_stress: true,
            high_stress_cost: costs.high_stress,
        }
    }
}

/// Minimum reachability cost between two blocks under each regime; `None` means unreachable.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PairCosts {
    pub low_stress: Option<f64>,
    pub high_stress: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressRegime {
    LowStress,
    HighStress,
}

impl StressRegime {
    /// Reachability table holding this regime's road-to-road costs.
    pub fn table(self) -> &'static str {
        match self {
            StressRegime::LowStress => "neighborhood_reachable_roads_low_stress",
            StressRegime::HighStress => "neighborhood_reachable_roads_high_stress",
        }
    }
}

impl Display for StressRegime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StressRegime::LowStress => write!(f, "low_stress"),
            StressRegime::HighStress => write!(f, "high_stress"),
        }
    }
}

impl FromStr for StressRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "low_stress" | "low" => Ok(StressRegime::LowStress),
            "high_stress" | "high" => Ok(StressRegime::HighStress),
            other => Err(format!("unknown stress regime '{other}'")),
        }
    }
}

/// Persisted per-source processing marker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    Claimed,
    Done,
}

impl SourceState {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceState::Pending => "pending",
            SourceState::Claimed => "claimed",
            SourceState::Done => "done",
        }
    }
}

impl FromStr for SourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SourceState::Pending),
            "claimed" => Ok(SourceState::Claimed),
            "done" => Ok(SourceState::Done),
            other => Err(format!("unknown source state '{other}'")),
        }
    }
}

/// Global stage of the graph once every source is committed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStage {
    Building,
    Reclassified,
    Indexed,
}
