mod common;

use blockconn_core::db::schema;
use blockconn_core::pipeline::claim_next;
use blockconn_core::selector::{blocks_in_boundary, load_boundary, select_candidates};
use blockconn_core::{Error, StressRegime};
use common::*;
use rusqlite::Connection;

#[test]
fn only_blocks_intersecting_boundary_are_candidates() {
    let mut db = mem_db();
    scenario(db.conn());
    index_blocks(db.conn());
    let got = select_candidates(&mut db, 1).unwrap();
    assert_eq!(got, vec!["A", "B", "C", "D"]);
}

#[test]
fn shrunk_boundary_drops_pending_sources_outside_it() {
    let mut db = mem_db();
    scenario(db.conn());
    index_blocks(db.conn());
    assert_eq!(select_candidates(&mut db, 1).unwrap().len(), 4);

    db.conn().execute("DELETE FROM neighborhood_boundary", []).unwrap();
    add_boundary(db.conn(), &square(-0.5, -0.5, 1.2));
    assert_eq!(select_candidates(&mut db, 2).unwrap(), vec!["A"]);
    assert_eq!(claim_next(&mut db, "w", 3).unwrap().as_deref(), Some("A"));
    assert_eq!(claim_next(&mut db, "w", 3).unwrap(), None);

    // Widening it again brings the dropped blocks back; the open claim on A is released.
    add_boundary(db.conn(), &square(-0.5, -0.5, 7.5));
    assert_eq!(select_candidates(&mut db, 4).unwrap(), vec!["A", "B", "C", "D"]);
}

#[test]
fn block_partly_inside_boundary_is_selected() {
    let mut db = mem_db();
    add_block(db.conn(), 1, "edge", &square(9.0, 0.0, 2.0), &[1]);
    add_block(db.conn(), 2, "outside", &square(20.0, 0.0, 1.0), &[2]);
    add_boundary(db.conn(), &square(0.0, 0.0, 10.0));
    index_blocks(db.conn());
    let boundary = load_boundary(db.conn()).unwrap();
    assert_eq!(blocks_in_boundary(db.conn(), &boundary).unwrap(), vec!["edge"]);
}

#[test]
fn selection_is_stable_until_sources_commit() {
    let mut db = mem_db();
    scenario(db.conn());
    index_blocks(db.conn());
    let first = select_candidates(&mut db, 1).unwrap();
    let second = select_candidates(&mut db, 2).unwrap();
    assert_eq!(first, second);

    build_all(&mut db, &scenario_config());
    assert!(select_candidates(&mut db, 3).unwrap().is_empty());
    assert!(select_candidates(&mut db, 4).unwrap().is_empty());
}

#[test]
fn zero_target_source_is_not_reselected() {
    let mut db = mem_db();
    add_block(db.conn(), 1, "lonely", &square(0.0, 0.0, 1.0), &[1]);
    add_block(db.conn(), 2, "distant", &square(50.0, 0.0, 1.0), &[2]);
    add_boundary(db.conn(), &square(-1.0, -1.0, 3.0));
    let stats = build_all(&mut db, &scenario_config());
    assert_eq!(stats.sources, 1);
    assert_eq!(stats.zero_target_sources, 1);
    assert_eq!(stats.rows, 0);
    assert_eq!(
        count(db.conn(), "SELECT target_count FROM neighborhood_block_progress WHERE block_id = 'lonely' AND state = 'done'"),
        0
    );
    assert!(select_candidates(&mut db, 9).unwrap().is_empty());
}

#[test]
fn sources_with_rows_but_no_marker_count_as_done() {
    let mut db = mem_db();
    scenario(db.conn());
    db.conn()
        .execute(
            "INSERT INTO neighborhood_connected_census_blocks (source_block_id, target_block_id) VALUES ('B', 'A')",
            [],
        )
        .unwrap();
    index_blocks(db.conn());
    assert_eq!(select_candidates(&mut db, 1).unwrap(), vec!["A", "C", "D"]);
    let p = db.progress_counts().unwrap();
    assert_eq!((p.pending, p.done), (3, 1));

    build_all(&mut db, &scenario_config());
    // B keeps its single legacy row and is never reprocessed.
    assert_eq!(db.connections_from("B").unwrap().len(), 1);
}

#[test]
fn interrupted_claims_return_to_pending() {
    let mut db = mem_db();
    scenario(db.conn());
    index_blocks(db.conn());
    select_candidates(&mut db, 1).unwrap();
    assert_eq!(claim_next(&mut db, "crashed", 2).unwrap().as_deref(), Some("A"));
    assert_eq!(db.progress_counts().unwrap().claimed, 1);

    let again = select_candidates(&mut db, 3).unwrap();
    assert_eq!(again, vec!["A", "B", "C", "D"]);
    assert_eq!(db.progress_counts().unwrap().claimed, 0);
}

#[test]
fn claims_are_handed_out_once() {
    let mut db = mem_db();
    scenario(db.conn());
    index_blocks(db.conn());
    select_candidates(&mut db, 1).unwrap();
    let mut seen = Vec::new();
    while let Some(s) = claim_next(&mut db, "w", 2).unwrap() {
        seen.push(s);
    }
    assert_eq!(seen, vec!["A", "B", "C", "D"]);
    assert_eq!(db.progress_counts().unwrap().claimed, 4);
}

#[test]
fn missing_or_empty_inputs_fail_before_writing() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(matches!(
        schema::require_inputs(&conn, &[StressRegime::LowStress]),
        Err(Error::MissingTable(t)) if t == "neighborhood_census_blocks"
    ));

    schema::create_input_tables(&conn).unwrap();
    assert!(matches!(schema::require_inputs(&conn, &[StressRegime::LowStress]), Err(Error::EmptyInput(_))));

    add_block(&conn, 1, "A", &square(0.0, 0.0, 1.0), &[1]);
    assert!(matches!(schema::require_inputs(&conn, &[StressRegime::LowStress]), Err(Error::EmptyInput("boundary polygons"))));
    assert!(!schema::table_exists(&conn, "neighborhood_block_progress").unwrap());

    add_boundary(&conn, &square(0.0, 0.0, 1.0));
    schema::require_inputs(&conn, &[StressRegime::LowStress, StressRegime::HighStress]).unwrap();
}

#[test]
fn corrupt_block_geometry_is_reported() {
    let conn = Connection::open_in_memory().unwrap();
    create_schema(&conn);
    add_block(&conn, 1, "bad", &[1, 2, 3], &[]);
    let err = schema::ensure_spatial_index(&conn).unwrap_err();
    assert!(matches!(err, Error::Decode { ref what, .. } if what == "block bad"), "{err}");
}
