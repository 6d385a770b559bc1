use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::queries::*;
use crate::error::Result;
use crate::models::{BlockConnection, GraphStage, SourceState};

pub mod open;
pub mod queries;
pub mod schema;

const STAGE_RECLASSIFIED: &str = "reclassified_at";
const STAGE_INDEXED: &str = "indexed_at";

/// Owns one connection. All writes go through [`Database::transaction`], which commits
/// on `Ok` and rolls back on every other exit path (error, `?`, panic unwinding).
pub struct Database {
    conn: Connection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounts {
    pub pending: i64,
    pub claimed: i64,
    pub done: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphStatus {
    pub progress: ProgressCounts,
    pub connections: i64,
    pub low_stress_connections: i64,
    pub stage: GraphStage,
    pub reclassified_at: Option<i64>,
    pub indexed_at: Option<i64>,
}

pub(crate) fn map_connection_row(r: &Row) -> rusqlite::Result<BlockConnection> {
    Ok(BlockConnection {
        source_block_id: r.get(0)?,
        target_block_id: r.get(1)?,
        low_stress: r.get(2)?,
        low_stress_cost: r.get(3)?,
        high_stress: r.get(4)?,
        high_stress_cost: r.get(5)?,
    })
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, cfg: &open::DbOpenConfig) -> Result<Self> {
        let conn = open::open_read_write_with_config(path, cfg)?;
        Ok(Self { conn })
    }

    /// Open a database that must already exist; a missing file is an error, not a new database.
    pub fn open_existing<P: AsRef<Path>>(path: P, cfg: &open::DbOpenConfig) -> Result<Self> {
        let conn = open::open_existing_with_config(path, cfg)?;
        Ok(Self { conn })
    }

    /// Construct from an existing connection (useful for tests).
    pub fn from_connection(conn: Connection) -> Self { Self { conn } }

    pub fn conn(&self) -> &Connection { &self.conn }

    /// Create output tables and the block R*Tree if absent.
    pub fn init(&self) -> Result<()> {
        schema::ensure_output_tables(&self.conn)
    }

    /// Run `f` inside an IMMEDIATE transaction (write lock taken up front).
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn progress_counts(&self) -> Result<ProgressCounts> {
        progress_counts(&self.conn)
    }

    pub fn connections_from(&self, source: &str) -> Result<Vec<BlockConnection>> {
        let mut stmt = self.conn.prepare_cached(CONNECTIONS_FROM)?;
        let rows = stmt.query_map(params![source], map_connection_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn stage(&self) -> Result<GraphStage> {
        Ok(if stage_time(&self.conn, STAGE_INDEXED)?.is_some() {
            GraphStage::Indexed
        } else if stage_time(&self.conn, STAGE_RECLASSIFIED)?.is_some() {
            GraphStage::Reclassified
        } else {
            GraphStage::Building
        })
    }

    pub fn status(&self) -> Result<GraphStatus> {
        Ok(GraphStatus {
            progress: self.progress_counts()?,
            connections: self.conn.query_row(COUNT_CONNECTIONS, [], |r| r.get(0))?,
            low_stress_connections: self.conn.query_row(COUNT_LOW_STRESS, [], |r| r.get(0))?,
            stage: self.stage()?,
            reclassified_at: stage_time(&self.conn, STAGE_RECLASSIFIED)?,
            indexed_at: stage_time(&self.conn, STAGE_INDEXED)?,
        })
    }

    /// Full reset of the graph: the only path that deletes connection rows.
    pub fn reset(&mut self) -> Result<()> {
        self.init()?;
        self.transaction(|tx| {
            crate::index::drop_graph_indexes(tx)?;
            let removed = tx.execute(&format!("DELETE FROM {CONNECTIONS}"), [])?;
            tx.execute(&format!("DELETE FROM {PROGRESS}"), [])?;
            tx.execute(CLEAR_STAGES, [])?;
            info!(removed, "graph reset");
            Ok(())
        })
    }
}

pub(crate) fn progress_counts(conn: &Connection) -> Result<ProgressCounts> {
    let mut stmt = conn.prepare_cached(COUNT_BY_STATE)?;
    let mut rows = stmt.query([])?;
    let mut c = ProgressCounts::default();
    while let Some(r) = rows.next()? {
        let state: String = r.get(0)?;
        let n: i64 = r.get(1)?;
        match state.parse::<SourceState>() {
            Ok(SourceState::Pending) => c.pending = n,
            Ok(SourceState::Claimed) => c.claimed = n,
            Ok(SourceState::Done) => c.done = n,
            Err(e) => warn!(error = %e, rows = n, "ignoring progress rows"),
        }
    }
    Ok(c)
}

fn stage_time(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let v: Option<String> = conn.query_row(GET_STAGE, params![key], |r| r.get(0)).optional()?;
    Ok(v.and_then(|s| s.parse().ok()))
}

pub(crate) fn mark_reclassified(conn: &Connection, now: i64) -> Result<()> {
    conn.execute(SET_STAGE, params![STAGE_RECLASSIFIED, now.to_string()])?;
    Ok(())
}

pub(crate) fn mark_indexed(conn: &Connection, now: i64) -> Result<()> {
    conn.execute(SET_STAGE, params![STAGE_INDEXED, now.to_string()])?;
    Ok(())
}

/// Any new source commit invalidates earlier reclassification and statistics.
pub(crate) fn clear_stages(conn: &Connection) -> Result<()> {
    conn.execute(CLEAR_STAGES, [])?;
    Ok(())
}
