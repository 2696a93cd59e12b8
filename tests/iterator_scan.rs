//! Iterator behavior: positioning, ordered scans, positioned writes, clone
//! semantics, forced closure around conflicting writes and custom key order.

use ordmap::{Comparator, Connection, MapSpec, MemEngine, StoreError};
use std::sync::Arc;

fn new_conn() -> Arc<Connection> {
    Connection::open(Arc::new(MemEngine::new()))
}

fn seeded(conn: &Arc<Connection>) -> Arc<ordmap::Map> {
    let map = conn.open_map(MapSpec::new("scan")).unwrap();
    for (k, v) in [(b"a", b"1"), (b"c", b"3"), (b"e", b"5")] {
        map.put(k, v).unwrap();
    }
    map
}

#[test]
fn begin_scans_in_key_order() {
    let conn = new_conn();
    let map = seeded(&conn);
    let mut iter = map.begin().unwrap().unwrap();
    let mut keys = Vec::new();
    loop {
        keys.push(iter.get().unwrap().0);
        if !iter.next(false).unwrap() {
            break;
        }
    }
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]);
}

#[test]
fn begin_on_an_empty_map_yields_no_iterator() {
    let conn = new_conn();
    let map = conn.open_map(MapSpec::new("empty")).unwrap();
    assert!(map.begin().unwrap().is_none());
}

#[test]
fn find_is_exact() {
    let conn = new_conn();
    let map = seeded(&conn);
    let iter = map.find(b"c").unwrap().unwrap();
    assert_eq!(iter.get().unwrap(), (b"c".to_vec(), b"3".to_vec()));
    assert!(map.find(b"b").unwrap().is_none());
}

#[test]
fn lower_and_upper_bound_differ_on_exact_matches() {
    let conn = new_conn();
    let map = seeded(&conn);

    let lower = map.lower_bound(b"c").unwrap().unwrap();
    assert_eq!(lower.key().unwrap(), b"c");
    let upper = map.upper_bound(b"c").unwrap().unwrap();
    assert_eq!(upper.key().unwrap(), b"e");

    // Between stored keys the two agree.
    let lower = map.lower_bound(b"b").unwrap().unwrap();
    assert_eq!(lower.key().unwrap(), b"c");
    let upper = map.upper_bound(b"b").unwrap().unwrap();
    assert_eq!(upper.key().unwrap(), b"c");

    // Past the last key neither positions.
    assert!(map.lower_bound(b"f").unwrap().is_none());
    assert!(map.upper_bound(b"e").unwrap().is_none());
}

#[test]
fn set_overwrites_the_current_record() {
    let conn = new_conn();
    let map = seeded(&conn);
    let mut iter = map.find(b"c").unwrap().unwrap();
    iter.set(b"30").unwrap();
    assert_eq!(iter.get().unwrap().1, b"30");
    drop(iter);
    assert_eq!(map.get(b"c").unwrap().as_deref(), Some(&b"30"[..]));
}

#[test]
fn erase_invalidates_reads_until_the_next_step() {
    let conn = new_conn();
    let map = seeded(&conn);
    let mut iter = map.find(b"c").unwrap().unwrap();
    iter.erase().unwrap();
    assert!(matches!(iter.get(), Err(StoreError::InvalidPosition)));
    assert!(iter.next(false).unwrap());
    assert_eq!(iter.get().unwrap().0, b"e");
    drop(iter);
    assert_eq!(map.get(b"c").unwrap(), None);
}

#[test]
fn clones_move_independently_but_share_the_transaction() {
    let conn = new_conn();
    let map = seeded(&conn);
    let iter = map.find(b"a").unwrap().unwrap();
    let mut clone = iter.try_clone().unwrap();
    assert!(clone.next(false).unwrap());
    assert_eq!(clone.get().unwrap().0, b"c");
    assert_eq!(iter.get().unwrap().0, b"a");
}

#[test]
fn auto_committed_writes_force_close_open_iterators() {
    let conn = new_conn();
    let map = seeded(&conn);
    let iter = map.begin().unwrap().unwrap();
    map.put(b"z", b"26").unwrap();
    assert!(matches!(iter.get(), Err(StoreError::InvalidPosition)));
}

#[test]
fn iterators_inside_an_explicit_transaction_survive_writes() {
    let conn = new_conn();
    let map = seeded(&conn);
    let txn = conn.begin_transaction().unwrap();
    let iter = map.find(b"a").unwrap().unwrap();
    map.put(b"z", b"26").unwrap();
    assert_eq!(iter.get().unwrap().0, b"a");
    drop(iter);
    txn.commit().unwrap();
}

#[test]
fn close_is_idempotent() {
    let conn = new_conn();
    let map = seeded(&conn);
    let mut iter = map.begin().unwrap().unwrap();
    iter.close();
    iter.close();
    assert!(matches!(iter.get(), Err(StoreError::InvalidPosition)));
}

#[test]
fn custom_comparator_orders_the_scan_and_find_still_works() {
    let conn = new_conn();
    let reverse: Arc<dyn Comparator> = Arc::new(|a: &[u8], b: &[u8]| b.cmp(a));
    let map = conn
        .open_map(MapSpec::new("rev").with_comparator(reverse))
        .unwrap();
    for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
        map.put(k, v).unwrap();
    }

    let mut iter = map.begin().unwrap().unwrap();
    let mut keys = Vec::new();
    loop {
        keys.push(iter.get().unwrap().0);
        if !iter.next(false).unwrap() {
            break;
        }
    }
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

    // Exact lookup under a custom comparator must not disturb the caller's
    // key; the returned record proves the seek buffer round-tripped intact.
    let key = b"b".to_vec();
    let iter = map.find(&key).unwrap().unwrap();
    assert_eq!(iter.get().unwrap(), (b"b".to_vec(), b"2".to_vec()));
    assert_eq!(key, b"b");
}
