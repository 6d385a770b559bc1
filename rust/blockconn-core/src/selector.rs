//! Candidate selection: which boundary blocks still need outgoing rows.
//!
//! Processing state lives in `neighborhood_block_progress`, one marker per source,
//! so a source with zero neighbors is still recorded as done. Blocks that already
//! have outgoing rows but no marker (graphs built before markers existed) are
//! recorded as done too and are never reprocessed.

use std::collections::BTreeSet;

use geo::Intersects;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::db::queries::*;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::geometry::wkb::decode_multipolygon;
use crate::geometry::{BBox, MultiPolygon};
use crate::models::BlockId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Blocks intersecting the boundary.
    pub in_boundary: usize,
    /// Newly recorded as pending.
    pub seeded: usize,
    /// Newly recorded as done because rows already existed.
    pub legacy_done: usize,
    /// Pending markers dropped because their block no longer intersects the boundary.
    pub retired: usize,
}

/// All boundary rows merged into one geometry.
pub fn load_boundary(conn: &Connection) -> Result<MultiPolygon<f64>> {
    let mut stmt = conn.prepare_cached(BOUNDARY_GEOMS)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let id: i64 = r.get(0)?;
        let blob: Vec<u8> = r.get(1)?;
        let mp = decode_multipolygon(&blob)
            .map_err(|source| Error::Decode { what: format!("boundary {id}"), source })?;
        out.extend(mp.0);
    }
    if out.is_empty() {
        return Err(Error::EmptyInput("boundary polygons"));
    }
    Ok(MultiPolygon::new(out))
}

/// Ids of blocks whose geometry intersects the boundary (R*Tree prefilter, exact test).
pub fn blocks_in_boundary(conn: &Connection, boundary: &MultiPolygon<f64>) -> Result<Vec<BlockId>> {
    let mut row_ids = BTreeSet::new();
    {
        let mut stmt = conn.prepare_cached(RTREE_INTERSECT_RECT)?;
        for b in boundary.0.iter().filter_map(BBox::of) {
            let ids = stmt.query_map(params![b.minx, b.miny, b.maxx, b.maxy], |r| r.get::<_, i64>(0))?;
            for id in ids {
                row_ids.insert(id?);
            }
        }
    }
    let mut stmt = conn.prepare_cached(BLOCK_BY_ROW_ID)?;
    let mut out = Vec::new();
    for row_id in row_ids {
        let (block_id, blob): (String, Vec<u8>) = stmt.query_row(params![row_id], |r| Ok((r.get(1)?, r.get(2)?)))?;
        let geom = decode_multipolygon(&blob)
            .map_err(|source| Error::Decode { what: format!("block {block_id}"), source })?;
        if geom.intersects(boundary) {
            out.push(block_id);
        }
    }
    out.sort();
    Ok(out)
}

/// Record a progress marker for every boundary block that has none yet, and
/// drop pending markers of blocks outside `blocks` so workers never claim them.
/// A dropped block has no rows and is seeded again if the boundary regains it.
pub fn seed_progress(db: &mut Database, blocks: &[BlockId], now: i64) -> Result<SeedSummary> {
    db.transaction(|tx| {
        let mut legacy = tx.prepare_cached(SEED_LEGACY_DONE)?;
        let mut pending = tx.prepare_cached(SEED_PENDING)?;
        let mut s = SeedSummary { in_boundary: blocks.len(), ..Default::default() };
        for b in blocks {
            if legacy.execute(params![b, now])? > 0 {
                s.legacy_done += 1;
                continue;
            }
            s.seeded += pending.execute(params![b])?;
        }
        let keep: BTreeSet<&str> = blocks.iter().map(String::as_str).collect();
        let mut retire = tx.prepare_cached(RETIRE_PENDING)?;
        for b in pending_sources(tx)? {
            if !keep.contains(b.as_str()) {
                s.retired += retire.execute(params![b])?;
            }
        }
        Ok(s)
    })
}

/// Claims left by an interrupted run never committed rows, so they go back to pending.
/// Assumes no other build process is working on the same database.
pub fn release_stale_claims(db: &mut Database) -> Result<usize> {
    let n = db.transaction(|tx| Ok(tx.execute(RELEASE_STALE_CLAIMS, [])?))?;
    if n > 0 {
        warn!(released = n, "released claims left by an interrupted run");
    }
    Ok(n)
}

pub fn pending_sources(conn: &Connection) -> Result<Vec<BlockId>> {
    let mut stmt = conn.prepare_cached(PENDING_SOURCES)?;
    let rows = stmt.query_map([], |r| r.get(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Boundary blocks that intersect the boundary and have not been processed yet.
/// Safe to call repeatedly; it never returns a source that has committed rows.
pub fn select_candidates(db: &mut Database, now: i64) -> Result<Vec<BlockId>> {
    let boundary = load_boundary(db.conn())?;
    let blocks = blocks_in_boundary(db.conn(), &boundary)?;
    if blocks.is_empty() {
        return Err(Error::EmptyInput("census blocks intersecting the boundary"));
    }
    release_stale_claims(db)?;
    let seed = seed_progress(db, &blocks, now)?;
    debug!(?seed, "seeded progress markers");
    let candidates = pending_sources(db.conn())?;
    info!(
        in_boundary = seed.in_boundary,
        legacy_done = seed.legacy_done,
        retired = seed.retired,
        candidates = candidates.len(),
        "selected candidate sources"
    );
    Ok(candidates)
}
