//! # Map Lifecycle
//!
//! Closing, destroying and rebuilding maps. The rules, in order of severity:
//!
//! - `close` releases this handle: iterators are force-closed, indices
//!   detach, the name leaves the connection's open-map registry. The shared
//!   physical handle stays referenced until `close_db` or drop.
//! - `destroy` physically removes the primary tree, every attached index
//!   tree and the catalog rows, inside one unit of work. Refused while an
//!   explicit transaction is active and for reserved names.
//! - `recreate` rebuilds a map under a new specification by replaying every
//!   record through the new write path, so a changed comparator or index set
//!   takes full effect. It is all-or-nothing: one transaction covers the
//!   rename-aside, the rebuild and the cleanup, and an abort restores the
//!   original store untouched.

use crate::catalog::{self, Catalog};
use crate::connection::Connection;
use crate::engine::{Engine, EngineError, StepMode, TreeOptions, TxnId};
use crate::errors::{Result, StoreError};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use super::{ensure_capacity, index_tree_name, run_txn, Map, MapSpec, MIN_BUFFER};

impl Map {
    /// Releases this handle: force-closes its iterators, detaches its
    /// indices and removes the name from the open-map registry. Stored data
    /// is untouched. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        self.close_all_iterators();
        self.indices.write().clear();
        if self.registered.swap(false, AtomicOrdering::AcqRel) {
            self.conn().unregister_map(self.name());
        }
        if self.conn().trace_level() >= 1 {
            tracing::debug!(map = %self.name(), "map closed");
        }
    }

    /// `close`, then releases the shared physical handle as well. The
    /// engine-side tree closes when the last referent on this connection is
    /// gone.
    pub fn close_db(&self) {
        self.close();
        *self.tree.lock() = None;
    }

    /// Physically removes the map: primary tree, attached index trees and
    /// catalog rows, in one unit of work. The handle is closed first, so the
    /// map is unusable afterwards even if removal fails partway.
    pub fn destroy(&self) -> Result<()> {
        self.check_open()?;
        if self.conn().current_txn().is_some() {
            return Err(StoreError::TransactionActive);
        }
        if catalog::is_reserved(self.name()) {
            return Err(StoreError::ReservedMap(self.name().to_string()));
        }
        let name = self.name().to_string();
        let conn = Arc::clone(self.conn());
        self.close_db();

        let engine = Arc::clone(conn.engine());
        let catalog = Catalog::open(&engine)?;
        run_txn(&conn, &name, "destroy", |txn| {
            let indices = catalog.indices_for(Some(txn), &name)?;
            catalog.erase(Some(txn), &name)?;
            remove_tree_if_present(&engine, txn, &name)?;
            for index in &indices {
                remove_tree_if_present(&engine, txn, &index_tree_name(&name, index))?;
            }
            Ok(())
        })?;
        if conn.trace_level() >= 1 {
            tracing::debug!(map = %name, "map destroyed");
        }
        Ok(())
    }

    /// Rebuilds the map named by both specs: the existing store is read
    /// under `old`'s comparator and every record is replayed into a fresh
    /// store built to `new`, so `new`'s comparator orders the keys and
    /// `new`'s indices are derived from scratch. The whole rebuild is one
    /// unit of work; on failure the original store survives unchanged.
    ///
    /// Refused while the map is open on this connection, while an explicit
    /// transaction is active, and for reserved names.
    pub fn recreate(conn: &Arc<Connection>, old: MapSpec, new: MapSpec) -> Result<()> {
        if old.name != new.name {
            return Err(StoreError::Storage(format!(
                "recreate: specs name different maps ('{}' vs '{}')",
                old.name, new.name
            )));
        }
        let name = new.name.clone();
        if catalog::is_reserved(&name) {
            return Err(StoreError::ReservedMap(name));
        }
        for spec in &new.indices {
            super::validate_index_name(&spec.name)?;
        }
        if conn.map_is_open(&name) {
            return Err(StoreError::MapOpen(name));
        }
        if conn.current_txn().is_some() {
            return Err(StoreError::TransactionActive);
        }

        let engine = Arc::clone(conn.engine());
        let catalog = Catalog::open(&engine)?;
        let staging = format!("{name}.recreate");
        run_txn(conn, &name, "recreate", |txn| {
            rebuild(&engine, &catalog, txn, &name, &staging, &old, &new)
        })?;
        if conn.trace_level() >= 1 {
            tracing::debug!(map = %name, "map recreated");
        }
        Ok(())
    }
}

fn remove_tree_if_present(
    engine: &Arc<dyn Engine>,
    txn: TxnId,
    name: &str,
) -> Result<()> {
    match engine.remove_tree(Some(txn), name) {
        Ok(()) | Err(EngineError::NotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn rebuild(
    engine: &Arc<dyn Engine>,
    catalog: &Catalog,
    txn: TxnId,
    name: &str,
    staging: &str,
    old: &MapSpec,
    new: &MapSpec,
) -> Result<()> {
    // Old index trees are derived data; drop them rather than migrate.
    for index in catalog.indices_for(Some(txn), name)? {
        remove_tree_if_present(engine, txn, &index_tree_name(name, &index))?;
    }
    // A staging tree left behind by an interrupted run is stale.
    remove_tree_if_present(engine, txn, staging)?;

    match engine.rename_tree(Some(txn), name, staging) {
        Ok(()) => {}
        Err(EngineError::NotFound) => {
            return Err(StoreError::Storage(format!(
                "recreate: map '{name}' does not exist"
            )))
        }
        Err(e) => return Err(e.into()),
    }

    let source = engine.open_tree(
        Some(txn),
        staging,
        TreeOptions {
            create: false,
            duplicates: false,
            comparator: old.comparator.clone(),
        },
    )?;
    let outcome = replay_into_new(engine, catalog, txn, name, source, new);
    engine.close_tree(source);
    outcome?;

    engine.remove_tree(Some(txn), staging)?;
    Ok(())
}

/// Creates the new primary and index trees and replays every staged record
/// through the new store's write path, so the new comparator and the index
/// extraction callbacks apply to each record.
fn replay_into_new(
    engine: &Arc<dyn Engine>,
    catalog: &Catalog,
    txn: TxnId,
    name: &str,
    source: crate::engine::TreeId,
    new: &MapSpec,
) -> Result<()> {
    let target = engine.open_tree(
        Some(txn),
        name,
        TreeOptions {
            create: true,
            duplicates: false,
            comparator: new.comparator.clone(),
        },
    )?;
    let mut index_names = Vec::with_capacity(new.indices.len());
    let mut index_trees = Vec::with_capacity(new.indices.len());

    let outcome = (|| -> Result<()> {
        for spec in &new.indices {
            let tree = engine.open_tree(
                Some(txn),
                &index_tree_name(name, &spec.name),
                TreeOptions {
                    create: true,
                    duplicates: true,
                    comparator: spec.comparator.clone(),
                },
            )?;
            index_trees.push(tree);
            // The replay below populates; nothing to backfill.
            engine.associate(Some(txn), target, tree, Arc::clone(&spec.extract), false)?;
            index_names.push(spec.name.clone());
        }
        catalog.record_map(Some(txn), name, &index_names)?;

        let mut cursor = engine.open_cursor(source, Some(txn))?;
        let mut key = Vec::with_capacity(MIN_BUFFER);
        let mut value = Vec::with_capacity(MIN_BUFFER);
        while cursor.step(StepMode::Next)? {
            loop {
                match cursor.read_into(&mut key, &mut value) {
                    Ok(()) => break,
                    Err(EngineError::BufferTooSmall { key_len, value_len }) => {
                        ensure_capacity(&mut key, key_len);
                        ensure_capacity(&mut value, value_len);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            engine.put(target, Some(txn), &key, &value)?;
        }
        Ok(())
    })();

    for tree in index_trees {
        engine.close_tree(tree);
    }
    engine.close_tree(target);
    outcome
}

impl Drop for Map {
    fn drop(&mut self) {
        self.close_db();
    }
}
