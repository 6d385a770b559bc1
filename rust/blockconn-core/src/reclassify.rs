//! Bulk low-stress classification of the finished graph.
//!
//! A pair becomes low-stress when the two blocks share a road segment, or when a
//! low-stress route exists whose cost is within `cost_ratio_threshold` of the
//! high-stress cost. A missing or zero high-stress cost passes automatically.
//! The cost test runs inside SQLite as a scalar function backed by [`StressRule`].

use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use tracing::info;

use crate::db::{mark_reclassified, progress_counts, Database};
use crate::error::{Error, Result};

pub const COST_RULE_FN: &str = "blockconn_cost_qualifies";

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StressRule {
    pub cost_ratio_threshold: f64,
}

impl StressRule {
    pub fn new(cost_ratio_threshold: f64) -> Self {
        Self { cost_ratio_threshold }
    }

    pub fn cost_qualifies(&self, low: Option<f64>, high: Option<f64>) -> bool {
        match (low, high) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(h)) if h == 0.0 => true,
            (Some(l), Some(h)) => l / h <= self.cost_ratio_threshold,
        }
    }

    /// Expose [`StressRule::cost_qualifies`] to SQL on this connection.
    pub fn register(&self, conn: &Connection) -> Result<()> {
        let rule = *self;
        conn.create_scalar_function(
            COST_RULE_FN,
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| {
                let low: Option<f64> = ctx.get(0)?;
                let high: Option<f64> = ctx.get(1)?;
                Ok(rule.cost_qualifies(low, high))
            },
        )?;
        Ok(())
    }
}

const RECLASSIFY: &str = "\
UPDATE neighborhood_connected_census_blocks SET low_stress = 1 \
WHERE low_stress = 0 AND ( \
    EXISTS ( \
        SELECT 1 FROM neighborhood_census_block_roads s \
        JOIN neighborhood_census_block_roads t ON t.road_id = s.road_id \
        WHERE s.block_id = neighborhood_connected_census_blocks.source_block_id \
          AND t.block_id = neighborhood_connected_census_blocks.target_block_id \
    ) \
    OR blockconn_cost_qualifies(low_stress_cost, high_stress_cost) \
)";

/// Single pass over every connection row. Only flips `low_stress` from false to
/// true, so a second pass changes nothing. Refuses to run while any source is
/// pending or claimed; the write lock is held from that check to the commit.
pub fn reclassify(db: &mut Database, rule: &StressRule, now: i64) -> Result<usize> {
    rule.register(db.conn())?;
    let updated = db.transaction(|tx| {
        let c = progress_counts(tx)?;
        if c.pending > 0 || c.claimed > 0 {
            return Err(Error::SourcesOutstanding { pending: c.pending, claimed: c.claimed });
        }
        let n = tx.execute(RECLASSIFY, params![])?;
        mark_reclassified(tx, now)?;
        Ok(n)
    })?;
    info!(updated, threshold = rule.cost_ratio_threshold, "reclassified low-stress pairs");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_rule_cases() {
        let r = StressRule::new(1.25);
        assert!(!r.cost_qualifies(None, Some(10.0)));
        assert!(!r.cost_qualifies(None, None));
        assert!(r.cost_qualifies(Some(100.0), None));
        assert!(r.cost_qualifies(Some(100.0), Some(0.0)));
        assert!(r.cost_qualifies(Some(125.0), Some(100.0)));
        assert!(!r.cost_qualifies(Some(126.0), Some(100.0)));
        assert!(!r.cost_qualifies(Some(100.0), Some(50.0)));
        assert!(r.cost_qualifies(Some(40.0), Some(50.0)));
    }

    #[test]
    fn shared_road_wins_over_failing_costs() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::create_input_tables(&conn).unwrap();
        crate::db::schema::ensure_output_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO neighborhood_census_block_roads (block_id, road_id) VALUES ('a', 1), ('a', 2), ('b', 2), ('c', 3);
             INSERT INTO neighborhood_connected_census_blocks
                 (source_block_id, target_block_id, low_stress, low_stress_cost, high_stress, high_stress_cost)
             VALUES ('a', 'b', 0, NULL, 1, NULL), ('a', 'c', 0, 100.0, 1, 50.0), ('b', 'c', 0, 40.0, 1, 50.0);",
        )
        .unwrap();
        let mut db = Database::from_connection(conn);
        assert_eq!(reclassify(&mut db, &StressRule::new(1.25), 7).unwrap(), 2);
        let low: Vec<(String, bool)> = {
            let mut stmt = db
                .conn()
                .prepare("SELECT target_block_id, low_stress FROM neighborhood_connected_census_blocks ORDER BY source_block_id, target_block_id")
                .unwrap();
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?))).unwrap().map(|r| r.unwrap()).collect()
        };
        assert_eq!(low, vec![("b".to_string(), true), ("c".to_string(), false), ("c".to_string(), true)]);
    }

    #[test]
    fn sql_function_matches_rule() {
        let conn = Connection::open_in_memory().unwrap();
        let r = StressRule::new(1.25);
        r.register(&conn).unwrap();
        let cases = [
            (Some(100.0), Some(50.0)),
            (Some(100.0), Some(0.0)),
            (Some(100.0), None),
            (None, Some(10.0)),
            (Some(12.5), Some(10.0)),
        ];
        for (low, high) in cases {
            let got: bool = conn
                .query_row(&format!("SELECT {COST_RULE_FN}(?1, ?2)"), params![low, high], |row| row.get(0))
                .unwrap();
            assert_eq!(got, r.cost_qualifies(low, high), "low={low:?} high={high:?}");
        }
    }
}
