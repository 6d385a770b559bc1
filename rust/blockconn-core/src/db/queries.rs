pub const BLOCKS: &str = "neighborhood_census_blocks";
pub const BLOCK_ROADS: &str = "neighborhood_census_block_roads";
pub const BOUNDARY: &str = "neighborhood_boundary";
pub const CONNECTIONS: &str = "neighborhood_connected_census_blocks";
pub const PROGRESS: &str = "neighborhood_block_progress";

pub const TABLE_EXISTS: &str = "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1";

// Blocks
pub const COUNT_BLOCKS: &str = "SELECT COUNT(*) FROM neighborhood_census_blocks";
pub const ALL_BLOCK_GEOMS: &str = "SELECT id, block_id, geom FROM neighborhood_census_blocks ORDER BY id ASC";
pub const BLOCK_BY_ID: &str = "SELECT id, block_id, geom FROM neighborhood_census_blocks WHERE block_id = ?1";
pub const BLOCK_BY_ROW_ID: &str = "SELECT id, block_id, geom FROM neighborhood_census_blocks WHERE id = ?1";
pub const ROADS_OF_BLOCK: &str =
    "SELECT DISTINCT road_id FROM neighborhood_census_block_roads WHERE block_id = ?1 ORDER BY road_id ASC";
pub const BOUNDARY_GEOMS: &str = "SELECT id, geom FROM neighborhood_boundary ORDER BY id ASC";

// Spatial index
pub const CLEAR_RTREE: &str = "DELETE FROM rtree_census_blocks";
pub const INSERT_RTREE: &str = "INSERT INTO rtree_census_blocks (id, minx, maxx, miny, maxy) VALUES (?1, ?2, ?3, ?4, ?5)";
pub const RTREE_INTERSECT_RECT: &str = "\
SELECT id FROM rtree_census_blocks \
WHERE minx <= ?3 AND maxx >= ?1 AND miny <= ?4 AND maxy >= ?2 \
ORDER BY id ASC"; // params: minx, miny, maxx, maxy

// Progress markers
pub const SEED_PENDING: &str = "INSERT OR IGNORE INTO neighborhood_block_progress (block_id, state) VALUES (?1, 'pending')";
pub const SEED_LEGACY_DONE: &str = "\
INSERT OR IGNORE INTO neighborhood_block_progress (block_id, state, completed_at, target_count) \
SELECT ?1, 'done', ?2, (SELECT COUNT(*) FROM neighborhood_connected_census_blocks WHERE source_block_id = ?1) \
WHERE EXISTS (SELECT 1 FROM neighborhood_connected_census_blocks WHERE source_block_id = ?1)";
pub const PENDING_SOURCES: &str =
    "SELECT block_id FROM neighborhood_block_progress WHERE state = 'pending' ORDER BY block_id ASC";
pub const RETIRE_PENDING: &str =
    "DELETE FROM neighborhood_block_progress WHERE block_id = ?1 AND state = 'pending'";
pub const RELEASE_STALE_CLAIMS: &str = "\
UPDATE neighborhood_block_progress SET state = 'pending', worker = NULL, claimed_at = NULL \
WHERE state = 'claimed'";
pub const CLAIM_NEXT: &str = "\
UPDATE neighborhood_block_progress SET state = 'claimed', worker = ?1, claimed_at = ?2 \
WHERE block_id = ( \
    SELECT block_id FROM neighborhood_block_progress WHERE state = 'pending' ORDER BY block_id ASC LIMIT 1 \
) \
RETURNING block_id";
pub const RELEASE_CLAIM: &str = "\
UPDATE neighborhood_block_progress SET state = 'pending', worker = NULL, claimed_at = NULL \
WHERE block_id = ?1 AND state = 'claimed' AND worker = ?2";
pub const MARK_DONE: &str = "\
UPDATE neighborhood_block_progress SET state = 'done', completed_at = ?2, target_count = ?3 \
WHERE block_id = ?1 AND state = 'claimed' AND worker = ?4";
pub const COUNT_BY_STATE: &str = "SELECT state, COUNT(*) FROM neighborhood_block_progress GROUP BY state";

// Connections
pub const INSERT_CONNECTION: &str = "\
INSERT INTO neighborhood_connected_census_blocks \
    (source_block_id, target_block_id, low_stress, low_stress_cost, high_stress, high_stress_cost) \
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
pub const CONNECTIONS_FROM: &str = "\
SELECT source_block_id, target_block_id, low_stress, low_stress_cost, high_stress, high_stress_cost \
FROM neighborhood_connected_census_blocks WHERE source_block_id = ?1 ORDER BY target_block_id ASC";
pub const COUNT_CONNECTIONS: &str = "SELECT COUNT(*) FROM neighborhood_connected_census_blocks";
pub const COUNT_LOW_STRESS: &str = "SELECT COUNT(*) FROM neighborhood_connected_census_blocks WHERE low_stress = 1";

// Stage markers
pub const SET_STAGE: &str = "INSERT OR REPLACE INTO neighborhood_graph_state (key, value) VALUES (?1, ?2)";
pub const GET_STAGE: &str = "SELECT value FROM neighborhood_graph_state WHERE key = ?1";
pub const CLEAR_STAGES: &str = "DELETE FROM neighborhood_graph_state";

/// Minimum cost per target road reachable from any of the source roads.
/// `?1` is a JSON array of base road ids. The table name is substituted per regime.
pub fn min_cost_by_target_road(table: &str) -> String {
    format!(
        "SELECT target_road, MIN(total_cost) FROM {table} \
         WHERE base_road IN (SELECT value FROM json_each(?1)) AND total_cost IS NOT NULL \
         GROUP BY target_road"
    )
}
