//! # Iterators
//!
//! An [`Iter`] wraps one engine cursor plus the transaction it runs under.
//! Construction is positioning: an iterator either comes back positioned on
//! a record or does not come back at all (`Ok(None)`), so a live iterator
//! always has a current record until a failed advance or a force-close.
//!
//! ## Transaction Binding
//!
//! With an explicit connection transaction active, the cursor joins it and
//! the iterator never outlives the caller's unit of work semantics. Without
//! one, a primary iterator begins its own implicit transaction and owns it:
//! the transaction lives exactly as long as the cursor (clones share it) and
//! is resolved when the last owner drops. A deadlock on any operation marks
//! the implicit transaction dead; resolution then aborts instead of commits.
//! Index iterators opened outside an explicit transaction read untracked.
//!
//! ## Forced Closure
//!
//! The owning map force-closes iterators around conflicting writes. A
//! force-closed iterator is not invalidated memory-wise; every subsequent
//! operation simply reports an invalid position.
//!
//! ## Buffers
//!
//! Each iterator owns a key and a value read buffer starting at 1 KiB,
//! grown to the exact sizes the engine reports when a record does not fit.

use crate::comparator::Comparator;
use crate::engine::{Engine, EngineError, StepMode, TreeCursor, TreeId, TxnId};
use crate::errors::{Result, StoreError};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::{ensure_capacity, Map, MIN_BUFFER};

/// Where a new iterator should land.
pub(crate) enum SeekTarget<'a> {
    /// First record in comparator order.
    First,
    /// Exactly `key` (first duplicate on an index).
    Find(&'a [u8]),
    /// Smallest key >= `key`.
    LowerBound(&'a [u8]),
    /// Smallest key strictly greater than `key`.
    UpperBound(&'a [u8]),
}

/// Implicit transaction owned by an iterator. Commits on drop unless a
/// deadlock marked it dead, in which case it aborts.
pub(crate) struct ImplicitTxn {
    engine: Arc<dyn Engine>,
    id: TxnId,
    dead: AtomicBool,
}

impl ImplicitTxn {
    fn mark_dead(&self) {
        self.dead.store(true, AtomicOrdering::Release);
    }
}

impl Drop for ImplicitTxn {
    fn drop(&mut self) {
        let outcome = if self.dead.load(AtomicOrdering::Acquire) {
            self.engine.abort(self.id)
        } else {
            self.engine.commit(self.id)
        };
        if let Err(err) = outcome {
            tracing::debug!(%err, txn = %self.id, "implicit transaction resolution failed");
        }
    }
}

/// How an iterator's cursor relates to transactions.
#[derive(Clone)]
enum TxnBinding {
    /// Untracked read (index iterator outside any explicit transaction).
    None,
    /// Joined the connection's explicit transaction.
    Explicit(TxnId),
    /// Owns (a share of) an implicit transaction.
    Implicit(Arc<ImplicitTxn>),
}

impl TxnBinding {
    fn engine_txn(&self) -> Option<TxnId> {
        match self {
            TxnBinding::None => None,
            TxnBinding::Explicit(id) => Some(*id),
            TxnBinding::Implicit(txn) => Some(txn.id),
        }
    }

    fn explicit_id(&self) -> Option<TxnId> {
        match self {
            TxnBinding::Explicit(id) => Some(*id),
            _ => None,
        }
    }
}

struct IterInner {
    cursor: Box<dyn TreeCursor>,
    txn: TxnBinding,
    on_index: bool,
    /// Set when the iterator is confined to one derived key's duplicate run.
    dup_key: Option<Vec<u8>>,
    cmp: Arc<dyn Comparator>,
    compare_enabled: bool,
    key_buf: Vec<u8>,
    val_buf: Vec<u8>,
}

/// Shared iterator state; the map registry holds a weak handle so it can
/// force-close without extending the iterator's lifetime.
pub(crate) struct IterState {
    inner: Mutex<Option<IterInner>>,
}

impl IterState {
    /// Drops the cursor and transaction binding. Subsequent operations on
    /// the owning iterator report an invalid position.
    pub(crate) fn force_close(&self) {
        *self.inner.lock() = None;
    }

    /// Engine transaction the cursor runs under, if still open.
    pub(crate) fn txn_binding(&self) -> Option<TxnId> {
        self.inner.lock().as_ref().and_then(|i| i.txn.engine_txn())
    }
}

/// A positioned iterator over a primary map or a secondary index.
pub struct Iter {
    map: Arc<Map>,
    state: Arc<IterState>,
    id: u64,
}

impl Iter {
    pub(crate) fn open_primary(map: &Arc<Map>, target: SeekTarget<'_>) -> Result<Option<Iter>> {
        let tree = map.tree_id()?;
        Iter::open_on(
            map,
            tree,
            false,
            None,
            map.comparator_arc(),
            map.compare_enabled(),
            target,
        )
    }

    /// Opens a cursor on `tree`, binds it to a transaction and positions it.
    /// Positioning failures inside an implicitly owned transaction retry
    /// transparently; an explicit-transaction deadlock surfaces carrying the
    /// caller's transaction.
    pub(crate) fn open_on(
        map: &Arc<Map>,
        tree: TreeId,
        on_index: bool,
        dup_key: Option<Vec<u8>>,
        cmp: Arc<dyn Comparator>,
        compare_enabled: bool,
        target: SeekTarget<'_>,
    ) -> Result<Option<Iter>> {
        let engine = Arc::clone(map.conn().engine());
        loop {
            let txn = match map.conn().current_txn() {
                Some(id) => TxnBinding::Explicit(id),
                None if on_index => TxnBinding::None,
                None => {
                    let id = engine.begin()?;
                    TxnBinding::Implicit(Arc::new(ImplicitTxn {
                        engine: Arc::clone(&engine),
                        id,
                        dead: AtomicBool::new(false),
                    }))
                }
            };
            let mut inner = IterInner {
                cursor: engine.open_cursor(tree, txn.engine_txn())?,
                txn,
                on_index,
                dup_key: dup_key.clone(),
                cmp: Arc::clone(&cmp),
                compare_enabled,
                key_buf: Vec::with_capacity(MIN_BUFFER),
                val_buf: Vec::with_capacity(MIN_BUFFER),
            };
            match inner.position(&target) {
                Ok(true) => {
                    let state = Arc::new(IterState {
                        inner: Mutex::new(Some(inner)),
                    });
                    let id = map.register_iter(&state);
                    return Ok(Some(Iter {
                        map: Arc::clone(map),
                        state,
                        id,
                    }));
                }
                // Dropping `inner` resolves an implicit transaction here.
                Ok(false) => return Ok(None),
                Err(StoreError::Deadlock { txn: Some(_) }) => {
                    return Err(StoreError::Deadlock {
                        txn: inner.txn.explicit_id(),
                    })
                }
                Err(StoreError::Deadlock { txn: None }) => {
                    drop(inner);
                    if map.conn().deadlock_warning() {
                        tracing::warn!(map = %map.name(), "deadlock while opening iterator, retrying");
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The primary record at the current position. On an index iterator the
    /// derived key is resolved through the association to the primary pair.
    pub fn get(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut guard = self.state.inner.lock();
        let inner = guard.as_mut().ok_or(StoreError::InvalidPosition)?;
        inner.read_primary()
    }

    /// The raw tree key at the current position: the primary key on a map
    /// iterator, the derived key on an index iterator.
    pub fn key(&self) -> Result<Vec<u8>> {
        let mut guard = self.state.inner.lock();
        let inner = guard.as_mut().ok_or(StoreError::InvalidPosition)?;
        inner.read_tree_key()
    }

    /// Advances to the next record. `skip_duplicates` steps over the rest of
    /// the current duplicate run; on a duplicate-run-confined iterator the
    /// advance never leaves the run. Returns whether a record is current.
    pub fn next(&mut self, skip_duplicates: bool) -> Result<bool> {
        let mut guard = self.state.inner.lock();
        let inner = guard.as_mut().ok_or(StoreError::InvalidPosition)?;
        let mode = if inner.dup_key.is_some() {
            StepMode::NextDup
        } else if skip_duplicates {
            StepMode::NextNoDup
        } else {
            StepMode::Next
        };
        inner.cursor.step(mode).map_err(|e| inner.fail(e))
    }

    /// Overwrites the value at the current position. Refused on index
    /// iterators; the primary write path is the only way to mutate records.
    pub fn set(&mut self, value: &[u8]) -> Result<()> {
        let (owns_implicit, my_txn) = {
            let guard = self.state.inner.lock();
            let inner = guard.as_ref().ok_or(StoreError::InvalidPosition)?;
            if inner.on_index {
                return Err(StoreError::ReadOnlyCursor);
            }
            (
                matches!(inner.txn, TxnBinding::Implicit(_)),
                inner.txn.engine_txn(),
            )
        };
        if owns_implicit {
            self.map.close_iterators_bound_elsewhere(self.id, my_txn);
        }
        let mut guard = self.state.inner.lock();
        let inner = guard.as_mut().ok_or(StoreError::InvalidPosition)?;
        inner.cursor.overwrite(value).map_err(|e| inner.fail(e))
    }

    /// Deletes the record at the current position (index maintenance runs in
    /// the same unit of work). The iterator stays usable: a following
    /// `next` lands on the successor, while reads report an invalid
    /// position until then.
    pub fn erase(&mut self) -> Result<()> {
        let (owns_implicit, my_txn) = {
            let guard = self.state.inner.lock();
            let inner = guard.as_ref().ok_or(StoreError::InvalidPosition)?;
            if inner.on_index {
                return Err(StoreError::ReadOnlyCursor);
            }
            (
                matches!(inner.txn, TxnBinding::Implicit(_)),
                inner.txn.engine_txn(),
            )
        };
        if owns_implicit {
            self.map.close_iterators_bound_elsewhere(self.id, my_txn);
        }
        let mut guard = self.state.inner.lock();
        let inner = guard.as_mut().ok_or(StoreError::InvalidPosition)?;
        inner.cursor.delete_current().map_err(|e| inner.fail(e))
    }

    /// Duplicates the iterator at its current position. The clone shares the
    /// original's transaction binding, including ownership of an implicit
    /// transaction, which is resolved when the last sharer drops.
    pub fn try_clone(&self) -> Result<Iter> {
        let guard = self.state.inner.lock();
        let inner = guard.as_ref().ok_or(StoreError::InvalidPosition)?;
        let cursor = inner.cursor.try_clone().map_err(|e| inner.fail(e))?;
        let cloned = IterInner {
            cursor,
            txn: inner.txn.clone(),
            on_index: inner.on_index,
            dup_key: inner.dup_key.clone(),
            cmp: Arc::clone(&inner.cmp),
            compare_enabled: inner.compare_enabled,
            key_buf: Vec::with_capacity(MIN_BUFFER),
            val_buf: Vec::with_capacity(MIN_BUFFER),
        };
        let state = Arc::new(IterState {
            inner: Mutex::new(Some(cloned)),
        });
        let id = self.map.register_iter(&state);
        Ok(Iter {
            map: Arc::clone(&self.map),
            state,
            id,
        })
    }

    /// Releases the cursor and resolves an owned implicit transaction.
    /// Idempotent; a force-closed iterator closes cleanly.
    pub fn close(&mut self) {
        self.state.force_close();
        self.map.unregister_iter(self.id);
    }
}

impl Drop for Iter {
    fn drop(&mut self) {
        self.close();
    }
}

impl IterInner {
    fn position(&mut self, target: &SeekTarget<'_>) -> Result<bool> {
        let outcome = match target {
            SeekTarget::First => self.cursor.step(StepMode::Next),
            SeekTarget::Find(key) => {
                if self.compare_enabled {
                    // Under a custom comparator the engine's positioned
                    // search writes its view of the key back through the
                    // search buffer; seek through an owned pre-sized copy so
                    // the caller's slice is never written to.
                    let mut owned = Vec::with_capacity(key.len().max(MIN_BUFFER));
                    owned.extend_from_slice(key);
                    self.cursor.seek_exact(&owned)
                } else {
                    self.cursor.seek_exact(key)
                }
            }
            SeekTarget::LowerBound(key) => self.cursor.seek_range(key),
            SeekTarget::UpperBound(key) => self.seek_past(key),
        };
        outcome.map_err(|e| self.fail(e))
    }

    /// Range-seek, then step off an exact match so the position is strictly
    /// greater than `key`. On an index the whole duplicate run is skipped.
    fn seek_past(&mut self, key: &[u8]) -> std::result::Result<bool, EngineError> {
        if !self.cursor.seek_range(key)? {
            return Ok(false);
        }
        let found = self.tree_key_raw()?;
        if self.cmp.compare(&found, key) == Ordering::Equal {
            let mode = if self.on_index {
                StepMode::NextNoDup
            } else {
                StepMode::Next
            };
            return self.cursor.step(mode);
        }
        Ok(true)
    }

    fn read_primary(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        loop {
            match self
                .cursor
                .read_primary_into(&mut self.key_buf, &mut self.val_buf)
            {
                Ok(()) => return Ok((self.key_buf.clone(), self.val_buf.clone())),
                Err(EngineError::BufferTooSmall { key_len, value_len }) => {
                    ensure_capacity(&mut self.key_buf, key_len);
                    ensure_capacity(&mut self.val_buf, value_len);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn read_tree_key(&mut self) -> Result<Vec<u8>> {
        self.tree_key_raw().map_err(|e| self.fail(e))
    }

    fn tree_key_raw(&mut self) -> std::result::Result<Vec<u8>, EngineError> {
        loop {
            match self.cursor.read_into(&mut self.key_buf, &mut self.val_buf) {
                Ok(()) => return Ok(self.key_buf.clone()),
                Err(EngineError::BufferTooSmall { key_len, value_len }) => {
                    ensure_capacity(&mut self.key_buf, key_len);
                    ensure_capacity(&mut self.val_buf, value_len);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Classifies an engine failure. A deadlock poisons an owned implicit
    /// transaction so its eventual resolution aborts.
    fn fail(&self, err: EngineError) -> StoreError {
        if let EngineError::Deadlock = err {
            if let TxnBinding::Implicit(txn) = &self.txn {
                txn.mark_dead();
            }
            return StoreError::Deadlock {
                txn: self.txn.explicit_id(),
            };
        }
        StoreError::from(err)
    }
}
