//! Deadlock handling: auto-committed operations retry transparently,
//! explicit transactions surface the error carrying the transaction, and an
//! iterator's implicit transaction aborts after a deadlock.

use ordmap::{Connection, MapSpec, MemEngine, StoreError};
use std::sync::Arc;

fn new_engine_conn() -> (Arc<MemEngine>, Arc<Connection>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = Arc::new(MemEngine::new());
    let conn = Connection::open(engine.clone());
    (engine, conn)
}

#[test]
fn auto_committed_writes_absorb_deadlocks() {
    let (engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();

    engine.inject_deadlocks(2);
    map.put(b"k", b"v").unwrap();
    assert_eq!(map.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));

    engine.inject_deadlocks(1);
    assert_eq!(map.erase(b"k").unwrap(), 1);
}

#[test]
fn explicit_transactions_surface_the_deadlock_once() {
    let (engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();

    let txn = conn.begin_transaction().unwrap();
    let id = txn.id();
    engine.inject_deadlocks(1);
    match map.put(b"k", b"v") {
        Err(StoreError::Deadlock { txn: Some(victim) }) => assert_eq!(victim, id),
        other => panic!("expected a deadlock carrying the transaction, got {other:?}"),
    }
    // The engine-side transaction is still the caller's to resolve.
    txn.abort().unwrap();
    assert_eq!(map.get(b"k").unwrap(), None);
}

#[test]
fn clear_re_signals_deadlocks_inside_an_explicit_transaction() {
    let (engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"k", b"v").unwrap();

    let txn = conn.begin_transaction().unwrap();
    let id = txn.id();
    engine.inject_deadlocks(1);
    match map.clear() {
        Err(StoreError::Deadlock { txn: Some(victim) }) => assert_eq!(victim, id),
        other => panic!("expected a deadlock carrying the transaction, got {other:?}"),
    }
    txn.abort().unwrap();
    assert_eq!(map.size().unwrap(), 1);
}

#[test]
fn a_deadlocked_iterator_aborts_its_implicit_transaction() {
    let (engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"a", b"1").unwrap();
    map.put(b"b", b"2").unwrap();

    let mut iter = map.find(b"a").unwrap().unwrap();
    engine.inject_deadlocks(1);
    match iter.erase() {
        Err(StoreError::Deadlock { txn: None }) => {}
        other => panic!("expected an implicit-transaction deadlock, got {other:?}"),
    }
    drop(iter);

    // The implicit transaction aborted; nothing the iterator touched stuck.
    assert_eq!(map.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(map.size().unwrap(), 2);
}

#[test]
fn iterator_writes_commit_through_the_implicit_transaction() {
    let (_engine, conn) = new_engine_conn();
    let map = conn.open_map(MapSpec::new("kv")).unwrap();
    map.put(b"a", b"1").unwrap();

    let mut iter = map.find(b"a").unwrap().unwrap();
    iter.set(b"10").unwrap();
    drop(iter);
    assert_eq!(map.get(b"a").unwrap().as_deref(), Some(&b"10"[..]));
}
