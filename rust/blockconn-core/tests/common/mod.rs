#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize};

use blockconn_core::cost::CostAggregator;
use blockconn_core::db::schema;
use blockconn_core::geometry::wkb::encode_polygon;
use blockconn_core::geometry::{LineString, Polygon};
use blockconn_core::neighbors::NeighborFinder;
use blockconn_core::pipeline::{run_worker, SourceOutcome, WorkerContext, WorkerStats};
use blockconn_core::selector::select_candidates;
use blockconn_core::{BuildConfig, Database, StressRegime};
use rusqlite::{params, Connection};

pub fn square(x0: f64, y0: f64, side: f64) -> Vec<u8> {
    encode_polygon(&Polygon::new(
        LineString::from(vec![(x0, y0), (x0 + side, y0), (x0 + side, y0 + side), (x0, y0 + side)]),
        vec![],
    ))
}

pub fn create_schema(conn: &Connection) {
    schema::create_input_tables(conn).unwrap();
    schema::ensure_output_tables(conn).unwrap();
}

pub fn mem_db() -> Database {
    let conn = Connection::open_in_memory().unwrap();
    create_schema(&conn);
    Database::from_connection(conn)
}

pub fn add_block(conn: &Connection, row_id: i64, block_id: &str, geom: &[u8], roads: &[i64]) {
    conn.execute(
        "INSERT INTO neighborhood_census_blocks (id, block_id, geom) VALUES (?1, ?2, ?3)",
        params![row_id, block_id, geom],
    )
    .unwrap();
    for r in roads {
        conn.execute(
            "INSERT INTO neighborhood_census_block_roads (block_id, road_id) VALUES (?1, ?2)",
            params![block_id, r],
        )
        .unwrap();
    }
}

pub fn add_boundary(conn: &Connection, geom: &[u8]) {
    conn.execute("INSERT INTO neighborhood_boundary (geom) VALUES (?1)", params![geom]).unwrap();
}

pub fn add_reach(conn: &Connection, regime: StressRegime, base: i64, target: i64, cost: f64) {
    conn.execute(
        &format!("INSERT INTO {} (base_road, target_road, total_cost) VALUES (?1, ?2, ?3)", regime.table()),
        params![base, target, cost],
    )
    .unwrap();
}

pub fn index_blocks(conn: &Connection) {
    schema::ensure_spatial_index(conn).unwrap();
}

/// Select candidates and drain them with a single in-process worker.
pub fn build_all(db: &mut Database, cfg: &BuildConfig) -> WorkerStats {
    index_blocks(db.conn());
    select_candidates(db, 1_000).unwrap();
    let cancel = AtomicBool::new(false);
    let failed = AtomicBool::new(false);
    let on_commit = |_: &SourceOutcome| {};
    let ctx = WorkerContext {
        finder: NeighborFinder::new(cfg.search_radius, cfg.include_self_pairs),
        costs: CostAggregator::new(cfg.high_stress_source),
        cache_capacity: cfg.block_cache_capacity,
        cancel: &cancel,
        failed: &failed,
        budget: None::<&AtomicUsize>,
        on_commit: &on_commit,
    };
    run_worker(db, "test-0", &ctx).unwrap()
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).unwrap()
}

/// Row of unit squares one unit apart, searched with radius 1.5 so only direct
/// neighbors connect.
///
/// A(0,0) roads 1,2 | B(2,0) roads 2,3 | C(4,0) road 4 | D(6,0) road 5 | E(8,0) road 6 | far(100,0) road 9
///
/// The boundary covers A..D. E is a target only; `far` is out of reach.
pub fn scenario(conn: &Connection) {
    add_block(conn, 1, "A", &square(0.0, 0.0, 1.0), &[1, 2]);
    add_block(conn, 2, "B", &square(2.0, 0.0, 1.0), &[2, 3]);
    add_block(conn, 3, "C", &square(4.0, 0.0, 1.0), &[4]);
    add_block(conn, 4, "D", &square(6.0, 0.0, 1.0), &[5]);
    add_block(conn, 5, "E", &square(8.0, 0.0, 1.0), &[6]);
    add_block(conn, 6, "far", &square(100.0, 0.0, 1.0), &[9]);
    add_boundary(conn, &square(-0.5, -0.5, 7.5));

    // A -> B: share road 2; costs alone would fail the ratio.
    add_reach(conn, StressRegime::LowStress, 1, 3, 500.0);
    add_reach(conn, StressRegime::HighStress, 1, 3, 100.0);
    // B -> C: min over (2,3)x(4) is low 110, high 90.
    add_reach(conn, StressRegime::LowStress, 3, 4, 110.0);
    add_reach(conn, StressRegime::LowStress, 2, 4, 130.0);
    add_reach(conn, StressRegime::HighStress, 3, 4, 100.0);
    add_reach(conn, StressRegime::HighStress, 2, 4, 90.0);
    // C -> D: 100 / 50, ratio 2.0.
    add_reach(conn, StressRegime::LowStress, 4, 5, 100.0);
    add_reach(conn, StressRegime::HighStress, 4, 5, 50.0);
    // D -> C: zero high-stress cost.
    add_reach(conn, StressRegime::LowStress, 5, 4, 100.0);
    add_reach(conn, StressRegime::HighStress, 5, 4, 0.0);
    // D -> E: no high-stress route.
    add_reach(conn, StressRegime::LowStress, 5, 6, 50.0);
    // C -> B and B -> A: nothing.
}

pub fn scenario_config() -> BuildConfig {
    BuildConfig { search_radius: 1.5, ..Default::default() }
}
