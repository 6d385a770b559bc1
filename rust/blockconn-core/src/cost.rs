//! Minimum reachability cost between two blocks: the cheapest road-to-road cost
//! over every (source road, target road) combination, per stress regime.
//!
//! Costs are gathered once per source as `target_road -> min over source roads`,
//! after which each target only needs a fold over its own roads.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::db::queries::min_cost_by_target_road;
use crate::error::Result;
use crate::models::{PairCosts, RoadId, StressRegime};

#[derive(Copy, Clone, Debug)]
pub struct CostAggregator {
    /// Relation read for `high_stress_cost`. `LowStress` reproduces graphs built
    /// when both costs came from the low-stress relation.
    pub high_stress_source: StressRegime,
}

/// Per-source lookup tables, one per regime.
#[derive(Clone, Debug, Default)]
pub struct SourceCosts {
    low: HashMap<RoadId, f64>,
    high: HashMap<RoadId, f64>,
}

impl CostAggregator {
    pub fn new(high_stress_source: StressRegime) -> Self {
        Self { high_stress_source }
    }

    /// Relations this aggregator reads.
    pub fn regimes(&self) -> Vec<StressRegime> {
        let mut v = vec![StressRegime::LowStress];
        if self.high_stress_source != StressRegime::LowStress {
            v.push(self.high_stress_source);
        }
        v
    }

    pub fn for_source(&self, conn: &Connection, source_roads: &[RoadId]) -> Result<SourceCosts> {
        if source_roads.is_empty() {
            return Ok(SourceCosts::default());
        }
        let low = min_costs_from(conn, StressRegime::LowStress, source_roads)?;
        let high = if self.high_stress_source == StressRegime::LowStress {
            low.clone()
        } else {
            min_costs_from(conn, self.high_stress_source, source_roads)?
        };
        Ok(SourceCosts { low, high })
    }
}

impl SourceCosts {
    pub fn to_target(&self, target_roads: &[RoadId]) -> PairCosts {
        PairCosts {
            low_stress: min_over(&self.low, target_roads),
            high_stress: min_over(&self.high, target_roads),
        }
    }
}

fn min_over(costs: &HashMap<RoadId, f64>, roads: &[RoadId]) -> Option<f64> {
    roads.iter().filter_map(|r| costs.get(r).copied()).reduce(f64::min)
}

fn min_costs_from(conn: &Connection, regime: StressRegime, source_roads: &[RoadId]) -> Result<HashMap<RoadId, f64>> {
    let roads = serde_json::to_string(source_roads)?;
    let sql = min_cost_by_target_road(regime.table());
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![roads], |r| Ok((r.get::<_, RoadId>(0)?, r.get::<_, f64>(1)?)))?;
    let mut out = HashMap::new();
    for r in rows {
        let (road, cost) = r?;
        out.insert(road, cost);
    }
    Ok(out)
}
