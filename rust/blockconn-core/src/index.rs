use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{error, info};

use crate::db::{mark_indexed, progress_counts, Database};
use crate::error::{Error, Result};
use crate::models::GraphStage;

pub const PAIR_INDEX: &str = "idx_neighborhood_connected_census_blocks_pair";
pub const LOW_STRESS_INDEX: &str = "idx_neighborhood_connected_census_blocks_low_stress";
pub const HIGH_STRESS_INDEX: &str = "idx_neighborhood_connected_census_blocks_high_stress";

const DUPLICATE_PAIRS: &str = "\
SELECT source_block_id, target_block_id, COUNT(*) FROM neighborhood_connected_census_blocks \
GROUP BY source_block_id, target_block_id HAVING COUNT(*) > 1 \
ORDER BY source_block_id, target_block_id";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexReport {
    pub rows: i64,
    pub low_stress_rows: i64,
    pub high_stress_rows: i64,
}

/// Fails with `DuplicatePairs` if any (source, target) pair occurs more than once.
/// Duplicates mean a source was processed twice upstream; they are reported, never removed.
pub fn audit_duplicates(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(DUPLICATE_PAIRS)?;
    let mut rows = stmt.query([])?;
    let mut count = 0i64;
    let mut example: Option<(String, String)> = None;
    while let Some(r) = rows.next()? {
        count += 1;
        if example.is_none() {
            example = Some((r.get(0)?, r.get(1)?));
        }
    }
    match example {
        Some((example_source, example_target)) => {
            error!(count, %example_source, %example_target, "duplicate connection pairs");
            Err(Error::DuplicatePairs { count, example_source, example_target })
        }
        None => Ok(()),
    }
}

/// Unique (source, target) index, partial indexes for `low_stress` and `high_stress`
/// lookups, then `ANALYZE`. Requires a fully committed and reclassified graph.
pub fn build_indexes(db: &mut Database, now: i64) -> Result<IndexReport> {
    if db.stage()? < GraphStage::Reclassified {
        return Err(Error::NotReclassified);
    }
    let report = db.transaction(|tx| {
        let c = progress_counts(tx)?;
        if c.pending > 0 || c.claimed > 0 {
            return Err(Error::SourcesOutstanding { pending: c.pending, claimed: c.claimed });
        }
        audit_duplicates(tx)?;
        tx.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {PAIR_INDEX} \
                 ON neighborhood_connected_census_blocks (source_block_id, target_block_id); \
             CREATE INDEX IF NOT EXISTS {LOW_STRESS_INDEX} \
                 ON neighborhood_connected_census_blocks (source_block_id, target_block_id) WHERE low_stress = 1; \
             CREATE INDEX IF NOT EXISTS {HIGH_STRESS_INDEX} \
                 ON neighborhood_connected_census_blocks (source_block_id, target_block_id) WHERE high_stress = 1; \
             ANALYZE neighborhood_connected_census_blocks;"
        ))?;
        mark_indexed(tx, now)?;
        Ok(IndexReport {
            rows: tx.query_row("SELECT COUNT(*) FROM neighborhood_connected_census_blocks", [], |r| r.get(0))?,
            low_stress_rows: tx.query_row(
                "SELECT COUNT(*) FROM neighborhood_connected_census_blocks WHERE low_stress = 1",
                [],
                |r| r.get(0),
            )?,
            high_stress_rows: tx.query_row(
                "SELECT COUNT(*) FROM neighborhood_connected_census_blocks WHERE high_stress = 1",
                [],
                |r| r.get(0),
            )?,
        })
    })?;
    info!(?report, "built connection indexes");
    Ok(report)
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1", [name], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn drop_graph_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP INDEX IF EXISTS {PAIR_INDEX}; \
         DROP INDEX IF EXISTS {LOW_STRESS_INDEX}; \
         DROP INDEX IF EXISTS {HIGH_STRESS_INDEX};"
    ))?;
    Ok(())
}
