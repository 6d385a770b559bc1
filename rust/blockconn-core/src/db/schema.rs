use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::queries::*;
use crate::error::{Error, Result};
use crate::geometry::wkb::decode_multipolygon;
use crate::geometry::BBox;
use crate::models::StressRegime;

/// Tables the core reads. Upstream ingestion owns them; this DDL documents the
/// contract and is used to stand up empty inputs (tests, fresh databases).
pub const INPUT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS neighborhood_census_blocks (
    id INTEGER PRIMARY KEY,
    block_id TEXT NOT NULL UNIQUE,
    geom BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS neighborhood_census_block_roads (
    block_id TEXT NOT NULL,
    road_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_neighborhood_census_block_roads_block
    ON neighborhood_census_block_roads (block_id, road_id);
CREATE INDEX IF NOT EXISTS idx_neighborhood_census_block_roads_road
    ON neighborhood_census_block_roads (road_id, block_id);
CREATE TABLE IF NOT EXISTS neighborhood_boundary (
    id INTEGER PRIMARY KEY,
    geom BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS neighborhood_reachable_roads_low_stress (
    base_road INTEGER NOT NULL,
    target_road INTEGER NOT NULL,
    total_cost REAL
);
CREATE INDEX IF NOT EXISTS idx_neighborhood_reachable_roads_low_stress_base
    ON neighborhood_reachable_roads_low_stress (base_road, target_road, total_cost);
CREATE TABLE IF NOT EXISTS neighborhood_reachable_roads_high_stress (
    base_road INTEGER NOT NULL,
    target_road INTEGER NOT NULL,
    total_cost REAL
);
CREATE INDEX IF NOT EXISTS idx_neighborhood_reachable_roads_high_stress_base
    ON neighborhood_reachable_roads_high_stress (base_road, target_road, total_cost);
"#;

/// Tables the core writes.
pub const OUTPUT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS neighborhood_connected_census_blocks (
    source_block_id TEXT NOT NULL,
    target_block_id TEXT NOT NULL,
    low_stress INTEGER NOT NULL DEFAULT 0,
    low_stress_cost REAL,
    high_stress INTEGER NOT NULL DEFAULT 1,
    high_stress_cost REAL
);
CREATE INDEX IF NOT EXISTS idx_neighborhood_connected_census_blocks_source
    ON neighborhood_connected_census_blocks (source_block_id);
CREATE TABLE IF NOT EXISTS neighborhood_block_progress (
    block_id TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK (state IN ('pending', 'claimed', 'done')),
    worker TEXT,
    claimed_at INTEGER,
    completed_at INTEGER,
    target_count INTEGER
);
CREATE INDEX IF NOT EXISTS idx_neighborhood_block_progress_state
    ON neighborhood_block_progress (state, block_id);
CREATE TABLE IF NOT EXISTS neighborhood_graph_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE VIRTUAL TABLE IF NOT EXISTS rtree_census_blocks USING rtree(id, minx, maxx, miny, maxy);
"#;

pub fn create_input_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(INPUT_DDL)?;
    Ok(())
}

pub fn ensure_output_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(OUTPUT_DDL)?;
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(TABLE_EXISTS, params![name], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Fails before any write when inputs are missing or empty.
/// Only the reachability relations actually consulted are required.
pub fn require_inputs(conn: &Connection, regimes: &[StressRegime]) -> Result<()> {
    for t in [BLOCKS, BLOCK_ROADS, BOUNDARY] {
        if !table_exists(conn, t)? {
            return Err(Error::MissingTable(t.to_string()));
        }
    }
    for r in regimes {
        if !table_exists(conn, r.table())? {
            return Err(Error::MissingTable(r.table().to_string()));
        }
    }
    let blocks: i64 = conn.query_row(COUNT_BLOCKS, [], |r| r.get(0))?;
    if blocks == 0 {
        return Err(Error::EmptyInput("census blocks"));
    }
    let boundaries: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {BOUNDARY}"), [], |r| r.get(0))?;
    if boundaries == 0 {
        return Err(Error::EmptyInput("boundary polygons"));
    }
    Ok(())
}

/// Rebuild the block R*Tree from the current block geometries. Edited or
/// replaced blocks never leave a stale box behind; blocks with empty geometry
/// get no entry. Every geometry is decoded, so a corrupt blob aborts here
/// rather than mid-run.
pub fn ensure_spatial_index(conn: &Connection) -> Result<usize> {
    let blocks: i64 = conn.query_row(COUNT_BLOCKS, [], |r| r.get(0))?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(CLEAR_RTREE, [])?;
    let mut n = 0usize;
    {
        let mut sel = tx.prepare(ALL_BLOCK_GEOMS)?;
        let mut ins = tx.prepare(INSERT_RTREE)?;
        let mut rows = sel.query([])?;
        while let Some(r) = rows.next()? {
            let id: i64 = r.get(0)?;
            let block_id: String = r.get(1)?;
            let blob: Vec<u8> = r.get(2)?;
            let geom = decode_multipolygon(&blob)
                .map_err(|source| Error::Decode { what: format!("block {block_id}"), source })?;
            let Some(b) = BBox::of(&geom) else {
                continue;
            };
            ins.execute(params![id, b.minx, b.maxx, b.miny, b.maxy])?;
            n += 1;
        }
    }
    tx.commit()?;
    info!(blocks, indexed = n, "rebuilt block spatial index");
    Ok(n)
}
