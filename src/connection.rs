//! # Connection Management
//!
//! A [`Connection`] binds an application to one backing engine instance. It
//! owns the connection-wide state the map layer consults on every operation:
//!
//! - the **explicit transaction slot**: at most one caller-controlled
//!   transaction is active per connection; operations that find the slot
//!   empty wrap themselves in implicit units of work instead,
//! - the **shared tree-handle registry**: multiple `Map` instances opening
//!   the same name on one connection share a single reference-counted
//!   physical handle, released when the last referent closes,
//! - the **open-map registry**: which map names are currently open, used to
//!   guard lifecycle operations such as `recreate`,
//! - **diagnostics configuration**: trace verbosity and whether deadlock
//!   retries are logged.
//!
//! ## Transaction Ownership
//!
//! [`Transaction`] is an RAII guard. Committing consumes it; dropping an
//! uncommitted guard aborts the engine transaction and clears the slot, so a
//! panic or early return never leaks a dangling transaction.

use crate::engine::{Engine, TreeId, TreeOptions, TxnId};
use crate::errors::{Result, StoreError};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Diagnostics configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Verbosity of lifecycle tracing (0 = off).
    pub trace_level: u8,
    /// Whether transparent deadlock retries emit a warning.
    pub deadlock_warning: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            trace_level: 0,
            deadlock_warning: true,
        }
    }
}

/// Reference-counted handle to one physical tree. The engine-side handle is
/// closed when the last referent drops.
pub(crate) struct SharedTree {
    engine: Arc<dyn Engine>,
    pub(crate) id: TreeId,
}

impl Drop for SharedTree {
    fn drop(&mut self) {
        self.engine.close_tree(self.id);
    }
}

/// One application binding to a backing engine.
pub struct Connection {
    engine: Arc<dyn Engine>,
    options: ConnectionOptions,
    txn: Mutex<Option<TxnId>>,
    trees: Mutex<HashMap<String, Weak<SharedTree>>>,
    /// Open-map name -> handle count.
    maps: Mutex<HashMap<String, usize>>,
}

impl Connection {
    pub fn open(engine: Arc<dyn Engine>) -> Arc<Self> {
        Self::open_with_options(engine, ConnectionOptions::default())
    }

    pub fn open_with_options(engine: Arc<dyn Engine>, options: ConnectionOptions) -> Arc<Self> {
        Arc::new(Connection {
            engine,
            options,
            txn: Mutex::new(None),
            trees: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Begins the connection's explicit transaction. At most one may be
    /// active; nested transactions are a programming error.
    pub fn begin_transaction(self: &Arc<Self>) -> Result<Transaction> {
        let mut slot = self.txn.lock();
        if slot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        let id = self.engine.begin()?;
        *slot = Some(id);
        Ok(Transaction {
            conn: Arc::clone(self),
            id,
            resolved: false,
        })
    }

    /// The active explicit transaction, if any.
    pub fn current_txn(&self) -> Option<TxnId> {
        *self.txn.lock()
    }

    pub(crate) fn deadlock_warning(&self) -> bool {
        self.options.deadlock_warning
    }

    pub(crate) fn trace_level(&self) -> u8 {
        self.options.trace_level
    }

    /// Opens (or reuses) the shared physical handle for `name`. The first
    /// opener's options win for the lifetime of the shared handle.
    pub(crate) fn shared_tree(&self, name: &str, opts: TreeOptions) -> Result<Arc<SharedTree>> {
        let mut trees = self.trees.lock();
        if let Some(existing) = trees.get(name).and_then(Weak::upgrade) {
            // One engine-side open per shared handle; additional referents
            // only bump the Arc count.
            return Ok(existing);
        }
        let id = self.engine.open_tree(None, name, opts)?;
        let handle = Arc::new(SharedTree {
            engine: Arc::clone(&self.engine),
            id,
        });
        trees.insert(name.to_string(), Arc::downgrade(&handle));
        Ok(handle)
    }

    pub(crate) fn register_map(&self, name: &str) {
        *self.maps.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn unregister_map(&self, name: &str) {
        let mut maps = self.maps.lock();
        if let Some(count) = maps.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                maps.remove(name);
            }
        }
    }

    pub(crate) fn map_is_open(&self, name: &str) -> bool {
        self.maps.lock().contains_key(name)
    }

    fn release_txn(&self, id: TxnId) {
        let mut slot = self.txn.lock();
        if *slot == Some(id) {
            *slot = None;
        }
    }
}

/// Caller-controlled transaction guard. Aborts on drop unless committed.
pub struct Transaction {
    conn: Arc<Connection>,
    id: TxnId,
    resolved: bool,
}

impl Transaction {
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn commit(mut self) -> Result<()> {
        self.resolved = true;
        self.conn.release_txn(self.id);
        self.conn.engine.commit(self.id)?;
        Ok(())
    }

    pub fn abort(mut self) -> Result<()> {
        self.resolved = true;
        self.conn.release_txn(self.id);
        self.conn.engine.abort(self.id)?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.resolved {
            self.conn.release_txn(self.id);
            if let Err(err) = self.conn.engine.abort(self.id) {
                tracing::debug!(%err, "abort of dropped transaction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;

    fn conn() -> Arc<Connection> {
        Connection::open(Arc::new(MemEngine::new()))
    }

    #[test]
    fn only_one_explicit_transaction_at_a_time() {
        let conn = conn();
        let txn = conn.begin_transaction().unwrap();
        assert!(matches!(
            conn.begin_transaction(),
            Err(StoreError::TransactionActive)
        ));
        txn.commit().unwrap();
        assert!(conn.current_txn().is_none());
        conn.begin_transaction().unwrap().abort().unwrap();
    }

    #[test]
    fn dropping_a_transaction_clears_the_slot() {
        let conn = conn();
        {
            let _txn = conn.begin_transaction().unwrap();
            assert!(conn.current_txn().is_some());
        }
        assert!(conn.current_txn().is_none());
    }

    #[test]
    fn shared_tree_handles_are_reused() {
        let conn = conn();
        let opts = TreeOptions {
            create: true,
            ..Default::default()
        };
        let a = conn.shared_tree("t", opts.clone()).unwrap();
        let b = conn.shared_tree("t", opts).unwrap();
        assert_eq!(a.id, b.id);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
