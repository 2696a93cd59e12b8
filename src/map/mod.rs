//! # Map: the primary store
//!
//! A [`Map`] is one ordered primary store plus its attached secondary
//! indices and the registry of currently open iterators. It owns:
//!
//! - the reference-counted shared handle to the primary tree,
//! - the set of attached indices, keyed by index name,
//! - the open-iterator registry: non-owning weak handles used only to
//!   force-close iterators, never to extend their lifetime.
//!
//! ## Write Discipline
//!
//! Every mutating operation funnels through the deadlock-retry policy in
//! [`run_txn`]. When the connection has no active explicit transaction the
//! operation wraps itself in an implicit unit of work, retries unboundedly
//! on deadlock (contention is transient), and commits on success. When the
//! caller owns the transaction a deadlock is never retried here: the error
//! carries the transaction so the caller, who owns the whole unit, decides.
//!
//! Auto-committed `put`/`erase` additionally force-close every open iterator
//! on the map first; their cursors would otherwise observe an inconsistent
//! position mid-write.
//!
//! ## Index Atomicity
//!
//! Secondary maintenance is delegated to the engine association mechanism:
//! once an index is attached, every primary write updates the index inside
//! the same unit of work. The CRUD paths here carry no index-specific logic
//! beyond attachment.
//!
//! ## Thread Safety
//!
//! Registries are lock-protected; record operations delegate to the engine's
//! own locking. Individual iterators are single-threaded by contract.

mod index;
mod iter;
mod lifecycle;

pub use index::Index;
pub use iter::Iter;

use crate::catalog::{self, Catalog};
use crate::comparator::{self, Comparator};
use crate::connection::{Connection, SharedTree};
use crate::engine::{EngineError, StepMode, TreeId, TreeOptions, TxnId};
use crate::errors::{Result, StoreError};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use iter::{IterState, SeekTarget};

/// Starting size for key/value read buffers; grown on demand.
pub(crate) const MIN_BUFFER: usize = 1024;

pub(crate) fn ensure_capacity(buf: &mut Vec<u8>, needed: usize) {
    if buf.capacity() < needed {
        buf.reserve(needed - buf.len());
    }
}

/// Specification of one secondary index.
#[derive(Clone)]
pub struct IndexSpec {
    pub(crate) name: String,
    pub(crate) comparator: Option<Arc<dyn Comparator>>,
    pub(crate) extract: crate::engine::Extractor,
}

impl IndexSpec {
    /// `extract` receives the primary key and value and returns the derived
    /// key, or `None` to leave the record out of the index. It must be a
    /// pure function of its inputs.
    pub fn new<F>(name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        IndexSpec {
            name: name.into(),
            comparator: None,
            extract: Arc::new(extract),
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }
}

/// Specification of a map: name, key order, attached indices.
#[derive(Clone)]
pub struct MapSpec {
    pub(crate) name: String,
    pub(crate) comparator: Option<Arc<dyn Comparator>>,
    pub(crate) indices: Vec<IndexSpec>,
}

impl MapSpec {
    pub fn new(name: impl Into<String>) -> Self {
        MapSpec {
            name: name.into(),
            comparator: None,
            indices: Vec::new(),
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indices.push(index);
        self
    }
}

/// The primary key-value store.
pub struct Map {
    conn: Arc<Connection>,
    name: String,
    tree: Mutex<Option<Arc<SharedTree>>>,
    comparator: Option<Arc<dyn Comparator>>,
    indices: RwLock<HashMap<String, Arc<Index>>>,
    iters: Mutex<HashMap<u64, Weak<IterState>>>,
    next_iter: AtomicU64,
    closed: AtomicBool,
    /// Set once the map is counted in the connection's open-map registry;
    /// a handle that failed partway through `open` must not unregister.
    registered: AtomicBool,
}

impl Map {
    /// Opens (or creates) the map and attaches its indices. Newly created
    /// indices are populated from existing primary records.
    pub fn open(conn: &Arc<Connection>, spec: MapSpec) -> Result<Arc<Map>> {
        if catalog::is_reserved(&spec.name) {
            return Err(StoreError::ReservedMap(spec.name));
        }
        let tree = conn.shared_tree(
            &spec.name,
            TreeOptions {
                create: true,
                duplicates: false,
                comparator: spec.comparator.clone(),
            },
        )?;
        let map = Arc::new(Map {
            conn: Arc::clone(conn),
            name: spec.name,
            tree: Mutex::new(Some(tree)),
            comparator: spec.comparator,
            indices: RwLock::new(HashMap::new()),
            iters: Mutex::new(HashMap::new()),
            next_iter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        });

        let mut index_names = Vec::with_capacity(spec.indices.len());
        for index_spec in spec.indices {
            let name = index_spec.name.clone();
            validate_index_name(&name)?;
            if map.indices.read().contains_key(&name) {
                return Err(StoreError::IndexAttached(name));
            }
            let index = Index::attach(&map, index_spec)?;
            index_names.push(name.clone());
            map.indices.write().insert(name, index);
        }

        let catalog = Catalog::open(conn.engine())?;
        run_txn(conn, &map.name, "open", |txn| {
            catalog
                .record_map(Some(txn), &map.name, &index_names)
                .map_err(StoreError::from)
        })?;

        conn.register_map(&map.name);
        map.registered.store(true, AtomicOrdering::Release);
        if conn.trace_level() >= 1 {
            tracing::debug!(map = %map.name, indices = index_names.len(), "map opened");
        }
        Ok(map)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Whether a custom comparator is active (affects range-query buffer
    /// handling, see the iterator module).
    pub fn compare_enabled(&self) -> bool {
        self.comparator.is_some()
    }

    pub(crate) fn comparator_arc(&self) -> Arc<dyn Comparator> {
        comparator::resolve(self.comparator.as_ref())
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(StoreError::MapClosed(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn tree_id(&self) -> Result<TreeId> {
        self.tree
            .lock()
            .as_ref()
            .map(|t| t.id)
            .ok_or_else(|| StoreError::MapClosed(self.name.clone()))
    }

    /// Inserts or overwrites the record at `key`, updating every attached
    /// index in the same unit of work.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        let tree = self.tree_id()?;
        if self.conn.current_txn().is_none() {
            self.close_all_iterators();
        }
        run_txn(&self.conn, &self.name, "put", |txn| {
            self.conn
                .engine()
                .put(tree, Some(txn), key, value)
                .map_err(StoreError::from)
        })
    }

    /// Removes the record at `key`; returns how many records were removed
    /// (0 or 1).
    pub fn erase(&self, key: &[u8]) -> Result<usize> {
        self.check_open()?;
        let tree = self.tree_id()?;
        if self.conn.current_txn().is_none() {
            self.close_all_iterators();
        }
        run_txn(&self.conn, &self.name, "erase", |txn| {
            self.conn
                .engine()
                .delete(tree, Some(txn), key)
                .map(usize::from)
                .map_err(StoreError::from)
        })
    }

    /// Existence probe; does not fetch the value bytes.
    pub fn count(&self, key: &[u8]) -> Result<usize> {
        self.check_open()?;
        let tree = self.tree_id()?;
        run_txn(&self.conn, &self.name, "count", |txn| {
            self.conn
                .engine()
                .contains(tree, Some(txn), key)
                .map(usize::from)
                .map_err(StoreError::from)
        })
    }

    /// Direct point read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let tree = self.tree_id()?;
        run_txn(&self.conn, &self.name, "get", |txn| {
            let mut buf = Vec::with_capacity(MIN_BUFFER);
            loop {
                match self.conn.engine().get_into(tree, Some(txn), key, &mut buf) {
                    Ok(()) => return Ok(Some(std::mem::take(&mut buf))),
                    Err(EngineError::NotFound) => return Ok(None),
                    Err(EngineError::BufferTooSmall { value_len, .. }) => {
                        ensure_capacity(&mut buf, value_len);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
    }

    /// Deletes every record through a forward cursor scan.
    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        let tree = self.tree_id()?;
        run_txn(&self.conn, &self.name, "clear", |txn| {
            let mut cursor = self
                .conn
                .engine()
                .open_cursor(tree, Some(txn))
                .map_err(StoreError::from)?;
            while cursor.step(StepMode::Next).map_err(StoreError::from)? {
                cursor.delete_current().map_err(StoreError::from)?;
            }
            Ok(())
        })
    }

    /// Current record count, as reported by the engine's stats.
    pub fn size(&self) -> Result<u64> {
        self.check_open()?;
        let tree = self.tree_id()?;
        Ok(self.conn.engine().record_count(tree)?)
    }

    /// Iterator positioned exactly on `key`, or `None` when absent.
    pub fn find(self: &Arc<Self>, key: &[u8]) -> Result<Option<Iter>> {
        self.check_open()?;
        Iter::open_primary(self, SeekTarget::Find(key))
    }

    /// Iterator positioned on the smallest key >= `key`.
    pub fn lower_bound(self: &Arc<Self>, key: &[u8]) -> Result<Option<Iter>> {
        self.check_open()?;
        Iter::open_primary(self, SeekTarget::LowerBound(key))
    }

    /// Iterator positioned on the smallest key strictly greater than `key`.
    pub fn upper_bound(self: &Arc<Self>, key: &[u8]) -> Result<Option<Iter>> {
        self.check_open()?;
        Iter::open_primary(self, SeekTarget::UpperBound(key))
    }

    /// Iterator positioned on the first record.
    pub fn begin(self: &Arc<Self>) -> Result<Option<Iter>> {
        self.check_open()?;
        Iter::open_primary(self, SeekTarget::First)
    }

    /// Looks up an attached index by name.
    pub fn index(&self, name: &str) -> Result<Arc<Index>> {
        self.indices
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))
    }

    pub(crate) fn register_iter(&self, state: &Arc<IterState>) -> u64 {
        let id = self.next_iter.fetch_add(1, AtomicOrdering::Relaxed);
        self.iters.lock().insert(id, Arc::downgrade(state));
        id
    }

    pub(crate) fn unregister_iter(&self, id: u64) {
        self.iters.lock().remove(&id);
    }

    /// Force-closes every live iterator on this map.
    pub(crate) fn close_all_iterators(&self) {
        let states: Vec<Arc<IterState>> = {
            let mut iters = self.iters.lock();
            let states = iters.values().filter_map(Weak::upgrade).collect();
            iters.clear();
            states
        };
        for state in states {
            state.force_close();
        }
    }

    /// Force-closes iterators bound to a transaction different from
    /// `keep_txn`, sparing the iterator identified by `keep_id`. Used by
    /// positioned writes to avoid cross-transaction cursor interference.
    pub(crate) fn close_iterators_bound_elsewhere(&self, keep_id: u64, keep_txn: Option<TxnId>) {
        let candidates: Vec<Arc<IterState>> = {
            let iters = self.iters.lock();
            iters
                .iter()
                .filter(|&(&id, _)| id != keep_id)
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        for state in candidates {
            if state.txn_binding() != keep_txn {
                state.force_close();
            }
        }
    }
}

/// The deadlock-retry policy shared by map and index operations.
///
/// With an explicit transaction active the body runs once inside it and a
/// deadlock is re-signaled carrying that transaction. Without one, the body
/// runs inside its own unit of work and deadlocks retry unboundedly.
pub(crate) fn run_txn<T, F>(conn: &Arc<Connection>, map: &str, op: &str, mut body: F) -> Result<T>
where
    F: FnMut(TxnId) -> Result<T>,
{
    if let Some(txn) = conn.current_txn() {
        return body(txn).map_err(|e| match e {
            StoreError::Deadlock { .. } => StoreError::Deadlock { txn: Some(txn) },
            other => other,
        });
    }
    let engine = conn.engine();
    loop {
        let txn = engine.begin()?;
        let outcome = body(txn).and_then(|v| {
            engine.commit(txn)?;
            Ok(v)
        });
        match outcome {
            Ok(v) => return Ok(v),
            Err(StoreError::Deadlock { .. }) => {
                if let Err(err) = engine.abort(txn) {
                    tracing::debug!(%err, map, op, "abort after deadlock failed");
                }
                if conn.deadlock_warning() {
                    tracing::warn!(map, op, "deadlock detected, retrying");
                }
            }
            Err(e) => {
                let _ = engine.abort(txn);
                return Err(e);
            }
        }
    }
}

/// Engine-side name of an index tree.
pub(crate) fn index_tree_name(map: &str, index: &str) -> String {
    format!("{map}.{index}.idx")
}

/// The catalog stores index names NUL-joined in one row, so a name must be
/// non-empty and contain no NUL byte or the row cannot be decoded.
pub(crate) fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(StoreError::InvalidIndexName(name.to_string()));
    }
    Ok(())
}

impl Connection {
    /// Convenience wrapper for [`Map::open`].
    pub fn open_map(self: &Arc<Self>, spec: MapSpec) -> Result<Arc<Map>> {
        Map::open(self, spec)
    }
}
