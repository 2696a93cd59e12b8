//! Lifecycle: destroying maps and rebuilding them under a new specification
//! (comparator changes, index set changes), including preconditions.

use ordmap::{Comparator, Connection, IndexSpec, Map, MapSpec, MemEngine, StoreError};
use std::sync::Arc;

fn new_engine_conn() -> (Arc<MemEngine>, Arc<Connection>) {
    let engine = Arc::new(MemEngine::new());
    let conn = Connection::open(engine.clone());
    (engine, conn)
}

fn indexed_spec() -> MapSpec {
    MapSpec::new("items").with_index(IndexSpec::new("by_value", |_key, value| {
        Some(value.to_vec())
    }))
}

#[test]
fn destroy_removes_records_and_indices() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(indexed_spec()).unwrap();
    map.put(b"k1", b"red").unwrap();
    map.put(b"k2", b"blue").unwrap();
    map.destroy().unwrap();

    let map = conn.open_map(indexed_spec()).unwrap();
    assert_eq!(map.size().unwrap(), 0);
    assert_eq!(map.index("by_value").unwrap().count(b"red").unwrap(), 0);
}

#[test]
fn destroy_is_refused_inside_an_explicit_transaction() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();
    let txn = conn.begin_transaction().unwrap();
    assert!(matches!(map.destroy(), Err(StoreError::TransactionActive)));
    txn.abort().unwrap();
}

#[test]
fn recreate_is_refused_while_the_map_is_open() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();
    assert!(matches!(
        Map::recreate(&conn, MapSpec::new("items"), MapSpec::new("items")),
        Err(StoreError::MapOpen(_))
    ));
    map.close_db();
}

#[test]
fn a_failed_open_does_not_unregister_a_live_handle() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();

    let bad = MapSpec::new("items")
        .with_index(IndexSpec::new("dup", |_key, value| Some(value.to_vec())))
        .with_index(IndexSpec::new("dup", |_key, value| Some(value.to_vec())));
    assert!(matches!(
        conn.open_map(bad),
        Err(StoreError::IndexAttached(_))
    ));

    // The surviving handle still counts as open, so the rebuild is refused.
    assert!(matches!(
        Map::recreate(&conn, MapSpec::new("items"), MapSpec::new("items")),
        Err(StoreError::MapOpen(_))
    ));
    map.close_db();
}

#[test]
fn recreate_applies_a_new_comparator_to_existing_records() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();
    for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
        map.put(k, v).unwrap();
    }
    map.close_db();
    drop(map);

    let reverse: Arc<dyn Comparator> = Arc::new(|a: &[u8], b: &[u8]| b.cmp(a));
    Map::recreate(
        &conn,
        MapSpec::new("items"),
        MapSpec::new("items").with_comparator(Arc::clone(&reverse)),
    )
    .unwrap();

    let map = conn
        .open_map(MapSpec::new("items").with_comparator(reverse))
        .unwrap();
    assert_eq!(map.size().unwrap(), 3);
    let mut iter = map.begin().unwrap().unwrap();
    let mut keys = Vec::new();
    loop {
        keys.push(iter.get().unwrap().0);
        if !iter.next(false).unwrap() {
            break;
        }
    }
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn recreate_builds_newly_specified_indices_from_existing_data() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();
    map.put(b"k1", b"red").unwrap();
    map.put(b"k2", b"red").unwrap();
    map.close_db();
    drop(map);

    Map::recreate(&conn, MapSpec::new("items"), indexed_spec()).unwrap();

    let map = conn.open_map(indexed_spec()).unwrap();
    assert_eq!(map.index("by_value").unwrap().count(b"red").unwrap(), 2);
}

#[test]
fn recreate_drops_indices_absent_from_the_new_spec() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(indexed_spec()).unwrap();
    map.put(b"k1", b"red").unwrap();
    map.close_db();
    drop(map);

    Map::recreate(&conn, indexed_spec(), MapSpec::new("items")).unwrap();

    let map = conn.open_map(MapSpec::new("items")).unwrap();
    assert_eq!(map.size().unwrap(), 1);
    assert!(matches!(
        map.index("by_value"),
        Err(StoreError::IndexNotFound(_))
    ));
}

#[test]
fn recreate_retries_through_injected_deadlocks() {
    let (engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("items")).unwrap();
    map.put(b"k", b"v").unwrap();
    map.close_db();
    drop(map);

    engine.inject_deadlocks(1);
    Map::recreate(&conn, MapSpec::new("items"), MapSpec::new("items")).unwrap();

    let map = conn.open_map(MapSpec::new("items")).unwrap();
    assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[test]
fn recreating_a_reserved_map_is_refused() {
    let (_engine, conn) = new_engine_conn();
    assert!(matches!(
        Map::recreate(
            &conn,
            MapSpec::new(ordmap::CATALOG_MAP),
            MapSpec::new(ordmap::CATALOG_MAP)
        ),
        Err(StoreError::ReservedMap(_))
    ));
}
