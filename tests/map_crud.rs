//! Primary map CRUD: put/get/erase/count round-trips, explicit transaction
//! semantics, buffer growth for large records and lifecycle guards.

use ordmap::{Connection, MapSpec, MemEngine, StoreError};
use std::sync::Arc;

fn new_conn() -> Arc<Connection> {
    Connection::open(Arc::new(MemEngine::new()))
}

#[test]
fn put_get_erase_roundtrip() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();

    map.put(b"alpha", b"1").unwrap();
    map.put(b"beta", b"2").unwrap();
    assert_eq!(map.get(b"alpha").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(map.get(b"gamma").unwrap(), None);
    assert_eq!(map.count(b"beta").unwrap(), 1);
    assert_eq!(map.count(b"gamma").unwrap(), 0);
    assert_eq!(map.size().unwrap(), 2);

    assert_eq!(map.erase(b"alpha").unwrap(), 1);
    assert_eq!(map.erase(b"alpha").unwrap(), 0);
    assert_eq!(map.size().unwrap(), 1);
}

#[test]
fn put_overwrites_in_place() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"k", b"old").unwrap();
    map.put(b"k", b"new").unwrap();
    assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"new"[..]));
    assert_eq!(map.size().unwrap(), 1);
}

#[test]
fn clear_removes_every_record() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    for i in 0..10u8 {
        map.put(&[i], &[i]).unwrap();
    }
    map.clear().unwrap();
    assert_eq!(map.size().unwrap(), 0);
}

#[test]
fn values_larger_than_the_initial_buffer_read_back() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    let big = vec![0xAB; 4096];
    map.put(b"big", &big).unwrap();
    assert_eq!(map.get(b"big").unwrap(), Some(big.clone()));

    let iter = map.find(b"big").unwrap().unwrap();
    let (key, value) = iter.get().unwrap();
    assert_eq!(key, b"big");
    assert_eq!(value, big);
}

#[test]
fn explicit_transaction_commits_and_aborts() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"base", b"0").unwrap();

    let txn = conn.begin_transaction().unwrap();
    map.put(b"staged", b"1").unwrap();
    map.erase(b"base").unwrap();
    txn.abort().unwrap();
    assert_eq!(map.get(b"staged").unwrap(), None);
    assert_eq!(map.get(b"base").unwrap().as_deref(), Some(&b"0"[..]));

    let txn = conn.begin_transaction().unwrap();
    map.put(b"staged", b"1").unwrap();
    txn.commit().unwrap();
    assert_eq!(map.get(b"staged").unwrap().as_deref(), Some(&b"1"[..]));
}

#[test]
fn dropping_an_uncommitted_transaction_rolls_back() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    {
        let _txn = conn.begin_transaction().unwrap();
        map.put(b"k", b"v").unwrap();
    }
    assert_eq!(map.get(b"k").unwrap(), None);
}

#[test]
fn reserved_names_are_refused() {
    let conn = new_conn();
    assert!(matches!(
        conn.open_map(MapSpec::new(ordmap::CATALOG_MAP)),
        Err(StoreError::ReservedMap(_))
    ));
}

#[test]
fn operations_on_a_closed_map_report_map_closed() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"k", b"v").unwrap();
    map.close();
    assert!(matches!(map.put(b"k", b"v"), Err(StoreError::MapClosed(_))));
    assert!(matches!(map.get(b"k"), Err(StoreError::MapClosed(_))));
}

#[test]
fn closing_a_map_closes_its_outstanding_iterators() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"k", b"v").unwrap();
    let iter = map.find(b"k").unwrap().unwrap();
    map.close();
    assert!(matches!(iter.get(), Err(StoreError::InvalidPosition)));
}

#[test]
fn data_survives_close_and_reopen() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"k", b"v").unwrap();
    map.close_db();
    drop(map);

    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[test]
fn missing_index_lookup_reports_index_not_found() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    assert!(matches!(
        map.index("nope"),
        Err(StoreError::IndexNotFound(_))
    ));
}
