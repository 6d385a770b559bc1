//! Spatial neighbor search over census blocks.
//! The R*Tree narrows candidates to bounding boxes within the radius; membership
//! is then decided by the true polygon distance.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::queries::*;
use crate::error::{Error, Result};
use crate::geometry::wkb::decode_multipolygon;
use crate::geometry::{within_distance, BBox};
use crate::models::{CensusBlock, RoadId};

/// Decoded blocks keyed by row id. One per worker; not shared across threads.
pub struct BlockCache {
    blocks: LruCache<i64, Arc<CensusBlock>>,
    hits: u64,
    misses: u64,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self { blocks: LruCache::new(cap), hits: 0, misses: 0 }
    }

    pub fn hits(&self) -> u64 { self.hits }
    pub fn misses(&self) -> u64 { self.misses }

    pub fn by_row_id(&mut self, conn: &Connection, row_id: i64) -> Result<Arc<CensusBlock>> {
        if let Some(b) = self.blocks.get(&row_id) {
            self.hits += 1;
            return Ok(Arc::clone(b));
        }
        self.misses += 1;
        let mut stmt = conn.prepare_cached(BLOCK_BY_ROW_ID)?;
        let (block_id, blob): (String, Vec<u8>) = stmt.query_row(params![row_id], |r| Ok((r.get(1)?, r.get(2)?)))?;
        let block = Arc::new(load_block(conn, row_id, block_id, &blob)?);
        self.blocks.put(row_id, Arc::clone(&block));
        Ok(block)
    }

    pub fn by_block_id(&mut self, conn: &Connection, block_id: &str) -> Result<Option<Arc<CensusBlock>>> {
        let mut stmt = conn.prepare_cached(BLOCK_BY_ID)?;
        let row: Option<i64> = stmt.query_row(params![block_id], |r| r.get(0)).optional()?;
        match row {
            Some(row_id) => Ok(Some(self.by_row_id(conn, row_id)?)),
            None => Ok(None),
        }
    }
}

fn load_block(conn: &Connection, row_id: i64, block_id: String, blob: &[u8]) -> Result<CensusBlock> {
    let geom = decode_multipolygon(blob).map_err(|source| Error::Decode { what: format!("block {block_id}"), source })?;
    let road_ids = road_ids_of(conn, &block_id)?;
    Ok(CensusBlock { row_id, block_id, geom, road_ids })
}

/// Sorted, distinct road ids of a block.
pub fn road_ids_of(conn: &Connection, block_id: &str) -> Result<Vec<RoadId>> {
    let mut stmt = conn.prepare_cached(ROADS_OF_BLOCK)?;
    let rows = stmt.query_map(params![block_id], |r| r.get(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

#[derive(Copy, Clone, Debug)]
pub struct NeighborFinder {
    pub radius: f64,
    pub include_self: bool,
}

impl NeighborFinder {
    pub fn new(radius: f64, include_self: bool) -> Self {
        Self { radius, include_self }
    }

    /// Every block (inside the boundary or not) within `radius` of `source`, ordered by block id.
    pub fn neighbors(&self, conn: &Connection, cache: &mut BlockCache, source: &CensusBlock) -> Result<Vec<Arc<CensusBlock>>> {
        let Some(search) = BBox::of(&source.geom).map(|b| b.expand(self.radius)) else {
            return Ok(Vec::new());
        };
        let candidates: Vec<i64> = {
            let mut stmt = conn.prepare_cached(RTREE_INTERSECT_RECT)?;
            let rows = stmt.query_map(params![search.minx, search.miny, search.maxx, search.maxy], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let mut out = Vec::new();
        for row_id in candidates {
            if row_id == source.row_id && !self.include_self {
                continue;
            }
            let target = cache.by_row_id(conn, row_id)?;
            if within_distance(&source.geom, &target.geom, self.radius) {
                out.push(target);
            }
        }
        out.sort_by(|a, b| a.block_id.cmp(&b.block_id));
        Ok(out)
    }
}
