use rusqlite::params;
use tracing::debug;

use crate::db::queries::{INSERT_CONNECTION, MARK_DONE};
use crate::db::{clear_stages, Database};
use crate::error::{Error, Result};
use crate::models::BlockConnection;

/// Persist all rows of one source and mark it done, in a single transaction.
/// Either every row and the done-marker are committed, or nothing is.
/// The source must currently be claimed by `worker`.
pub fn commit_source(db: &mut Database, worker: &str, source: &str, rows: &[BlockConnection], now: i64) -> Result<usize> {
    db.transaction(|tx| {
        {
            let mut ins = tx.prepare_cached(INSERT_CONNECTION)?;
            for c in rows {
                debug_assert_eq!(c.source_block_id, source);
                ins.execute(params![
                    c.source_block_id,
                    c.target_block_id,
                    c.low_stress,
                    c.low_stress_cost,
                    c.high_stress,
                    c.high_stress_cost,
                ])?;
            }
        }
        let marked = tx.execute(MARK_DONE, params![source, now, rows.len() as i64, worker])?;
        if marked != 1 {
            return Err(Error::ClaimLost(source.to_string()));
        }
        clear_stages(tx)?;
        debug!(source, rows = rows.len(), "committed source");
        Ok(rows.len())
    })
}
