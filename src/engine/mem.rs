//! # In-Memory Reference Engine
//!
//! `MemEngine` implements the [`Engine`](super::Engine) traits over sorted
//! runs held in process memory. It is the crate's default backing engine and
//! the executable reference for engine semantics: per-tree comparators,
//! sorted duplicate runs, association callbacks maintained inside the same
//! unit of work as the primary write, and undo-logged transactions.
//!
//! ## Storage Layout
//!
//! Each tree is a `Vec<(key, value)>` kept sorted by the tree's comparator
//! (and by value bytes within one key for duplicate trees). Lookups are
//! binary searches; inserts and deletes shift the run. This favors
//! simplicity and deterministic ordering over write throughput, which is the
//! right trade-off for a reference engine.
//!
//! ## Transactions
//!
//! Transactions provide atomicity through an undo log: every physical
//! mutation performed under a transaction records its inverse, and abort
//! applies the log in reverse. There is no snapshot isolation between
//! concurrent transactions; callers that need serialization hold it above
//! this layer. Tree creation, rename and removal are undo-logged too, so a
//! schema migration aborts back to its starting state.
//!
//! ## Cursor Model
//!
//! A cursor remembers the key (and duplicate value) of its current record
//! and re-locates it on every operation. If the record was deleted underneath
//! the cursor, reads report `InvalidPosition` and the next step lands on the
//! successor, matching the positioned-delete semantics of page-oriented
//! engines.
//!
//! ## Fault Injection
//!
//! `inject_deadlocks(n)` arms a fuse that makes the next `n` entry mutations
//! fail with `EngineError::Deadlock`. The deadlock-retry tests drive the
//! retry policy through this hook; nothing in production paths arms it.

use super::{
    Engine, EngineError, Extractor, StepMode, TreeCursor, TreeId, TreeOptions, TxnId,
};
use crate::comparator::{self, Comparator};
use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::sync::Arc;

/// In-memory engine; cheap to clone through `Arc<dyn Engine>`.
pub struct MemEngine {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
}

#[derive(Clone)]
struct Assoc {
    secondary: TreeId,
    extract: Extractor,
}

#[derive(Clone)]
struct Tree {
    name: String,
    duplicates: bool,
    cmp: Arc<dyn Comparator>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Index associations maintained on writes to this (primary) tree.
    assocs: Vec<Assoc>,
    /// Back-link from a secondary tree to its primary, for `read_primary_into`.
    primary: Option<TreeId>,
    refs: usize,
}

impl Tree {
    fn new(name: &str, opts: &TreeOptions) -> Self {
        Tree {
            name: name.to_string(),
            duplicates: opts.duplicates,
            cmp: comparator::resolve(opts.comparator.as_ref()),
            entries: Vec::new(),
            assocs: Vec::new(),
            primary: None,
            refs: 0,
        }
    }

    /// First position whose entry is >= (key, value) in tree order. A `None`
    /// value compares before every stored value, so for duplicate trees this
    /// yields the first entry of the key's run.
    fn lower_bound(&self, key: &[u8], value: Option<&[u8]>) -> usize {
        self.entries
            .partition_point(|(k, v)| match self.cmp.compare(k, key) {
                Ordering::Less => true,
                Ordering::Equal => match value {
                    Some(vv) => v.as_slice() < vv,
                    None => false,
                },
                Ordering::Greater => false,
            })
    }

    fn entry_matches(&self, idx: usize, key: &[u8], value: Option<&[u8]>) -> bool {
        match self.entries.get(idx) {
            Some((k, v)) => {
                self.cmp.compare(k, key) == Ordering::Equal
                    && value.map_or(true, |vv| v.as_slice() == vv)
            }
            None => false,
        }
    }

    fn find_exact(&self, key: &[u8], value: Option<&[u8]>) -> Option<usize> {
        let idx = self.lower_bound(key, value);
        self.entry_matches(idx, key, value).then_some(idx)
    }
}

enum UndoOp {
    /// Re-insert an entry removed by a delete.
    Insert {
        tree: TreeId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Remove an entry added by an insert.
    Remove {
        tree: TreeId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Restore the previous value of an overwritten unique entry.
    Replace {
        tree: TreeId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Rename a tree back.
    Rename { from: String, to: String },
    /// Restore a removed tree wholesale.
    RestoreTree { id: TreeId, tree: Tree },
    /// Drop a tree created inside the transaction.
    DropTree { id: TreeId },
    /// Re-attach an association stripped by a tree removal.
    RestoreAssoc { tree: TreeId, assoc: Assoc },
}

struct TxnRecord {
    undo: SmallVec<[UndoOp; 16]>,
}

#[derive(Default)]
struct Inner {
    trees: HashMap<TreeId, Tree>,
    names: HashMap<String, TreeId>,
    txns: HashMap<u64, TxnRecord>,
    next_tree: u64,
    next_txn: u64,
    fault_deadlocks: u32,
}

impl Inner {
    fn tree(&self, id: TreeId) -> Result<&Tree, EngineError> {
        self.trees
            .get(&id)
            .ok_or_else(|| EngineError::Other(format!("unknown tree handle {id}")))
    }

    fn tree_mut(&mut self, id: TreeId) -> Result<&mut Tree, EngineError> {
        self.trees
            .get_mut(&id)
            .ok_or_else(|| EngineError::Other(format!("unknown tree handle {id}")))
    }

    fn check_txn(&self, txn: Option<TxnId>) -> Result<(), EngineError> {
        match txn {
            Some(t) if !self.txns.contains_key(&t.0) => {
                Err(EngineError::Other(format!("unknown transaction {t}")))
            }
            _ => Ok(()),
        }
    }

    fn record_undo(&mut self, txn: Option<TxnId>, op: UndoOp) {
        if let Some(t) = txn {
            if let Some(rec) = self.txns.get_mut(&t.0) {
                rec.undo.push(op);
            }
        }
    }

    fn take_fault(&mut self) -> Result<(), EngineError> {
        if self.fault_deadlocks > 0 {
            self.fault_deadlocks -= 1;
            return Err(EngineError::Deadlock);
        }
        Ok(())
    }

    /// Insert into a duplicate tree; an exact existing pair is a no-op.
    fn insert_pair(
        &mut self,
        id: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), EngineError> {
        let tree = self.tree_mut(id)?;
        let idx = tree.lower_bound(key, Some(value));
        if tree.entry_matches(idx, key, Some(value)) {
            return Ok(());
        }
        tree.entries.insert(idx, (key.to_vec(), value.to_vec()));
        self.record_undo(
            txn,
            UndoOp::Remove {
                tree: id,
                key: key.to_vec(),
                value: value.to_vec(),
            },
        );
        Ok(())
    }

    /// Remove an exact pair from a duplicate tree; missing pairs are ignored
    /// (index cleanup is best-effort by contract).
    fn remove_pair(
        &mut self,
        id: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), EngineError> {
        let tree = self.tree_mut(id)?;
        if let Some(idx) = tree.find_exact(key, Some(value)) {
            let (k, v) = tree.entries.remove(idx);
            self.record_undo(
                txn,
                UndoOp::Insert {
                    tree: id,
                    key: k,
                    value: v,
                },
            );
        }
        Ok(())
    }

    /// Write path for a tree, running association maintenance when the tree
    /// is a primary. `require_exists` implements positioned overwrite.
    fn put_tree(
        &mut self,
        id: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &[u8],
        require_exists: bool,
    ) -> Result<(), EngineError> {
        self.take_fault()?;
        self.check_txn(txn)?;
        let (duplicates, assocs) = {
            let tree = self.tree(id)?;
            (tree.duplicates, tree.assocs.clone())
        };

        if duplicates {
            return self.insert_pair(id, txn, key, value);
        }

        let old = {
            let tree = self.tree(id)?;
            tree.find_exact(key, None)
                .map(|idx| tree.entries[idx].1.clone())
        };
        if require_exists && old.is_none() {
            return Err(EngineError::InvalidPosition);
        }

        if let Some(old_value) = &old {
            for assoc in &assocs {
                if let Some(derived) = (assoc.extract)(key, old_value) {
                    self.remove_pair(assoc.secondary, txn, &derived, key)?;
                }
            }
        }

        let undo = {
            let tree = self.tree_mut(id)?;
            match tree.find_exact(key, None) {
                Some(idx) => {
                    let prev = std::mem::replace(&mut tree.entries[idx].1, value.to_vec());
                    UndoOp::Replace {
                        tree: id,
                        key: key.to_vec(),
                        value: prev,
                    }
                }
                None => {
                    let idx = tree.lower_bound(key, None);
                    tree.entries.insert(idx, (key.to_vec(), value.to_vec()));
                    UndoOp::Remove {
                        tree: id,
                        key: key.to_vec(),
                        value: value.to_vec(),
                    }
                }
            }
        };
        self.record_undo(txn, undo);

        for assoc in &assocs {
            if let Some(derived) = (assoc.extract)(key, value) {
                self.insert_pair(assoc.secondary, txn, &derived, key)?;
            }
        }
        Ok(())
    }

    /// Delete path; `dup_value` pins the exact pair in duplicate trees.
    fn delete_tree_entry(
        &mut self,
        id: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        dup_value: Option<&[u8]>,
    ) -> Result<bool, EngineError> {
        self.take_fault()?;
        self.check_txn(txn)?;
        let (duplicates, assocs) = {
            let tree = self.tree(id)?;
            (tree.duplicates, tree.assocs.clone())
        };

        let removed = {
            let tree = self.tree_mut(id)?;
            let probe = if duplicates { dup_value } else { None };
            match tree.find_exact(key, probe) {
                Some(idx) => Some(tree.entries.remove(idx)),
                None => None,
            }
        };
        let Some((k, v)) = removed else {
            return Ok(false);
        };

        if !duplicates {
            for assoc in &assocs {
                if let Some(derived) = (assoc.extract)(&k, &v) {
                    self.remove_pair(assoc.secondary, txn, &derived, &k)?;
                }
            }
        }
        self.record_undo(txn, UndoOp::Insert { tree: id, key: k, value: v });
        Ok(true)
    }

    fn apply_undo(&mut self, op: UndoOp) {
        match op {
            UndoOp::Insert { tree, key, value } => {
                if let Some(t) = self.trees.get_mut(&tree) {
                    let probe = t.duplicates.then_some(value.as_slice());
                    let idx = t.lower_bound(&key, probe);
                    if !t.entry_matches(idx, &key, probe) {
                        t.entries.insert(idx, (key, value));
                    }
                }
            }
            UndoOp::Remove { tree, key, value } => {
                if let Some(t) = self.trees.get_mut(&tree) {
                    let probe = t.duplicates.then_some(value.as_slice());
                    if let Some(idx) = t.find_exact(&key, probe) {
                        t.entries.remove(idx);
                    }
                }
            }
            UndoOp::Replace { tree, key, value } => {
                if let Some(t) = self.trees.get_mut(&tree) {
                    if let Some(idx) = t.find_exact(&key, None) {
                        t.entries[idx].1 = value;
                    }
                }
            }
            UndoOp::Rename { from, to } => {
                if let Some(id) = self.names.remove(&from) {
                    if let Some(t) = self.trees.get_mut(&id) {
                        t.name = to.clone();
                    }
                    self.names.insert(to, id);
                }
            }
            UndoOp::RestoreTree { id, tree } => {
                self.names.insert(tree.name.clone(), id);
                self.trees.insert(id, tree);
            }
            UndoOp::DropTree { id } => {
                if let Some(t) = self.trees.remove(&id) {
                    self.names.remove(&t.name);
                }
            }
            UndoOp::RestoreAssoc { tree, assoc } => {
                if let Some(t) = self.trees.get_mut(&tree) {
                    t.assocs.push(assoc);
                }
            }
        }
    }
}

impl MemEngine {
    pub fn new() -> Self {
        MemEngine {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Arms the deadlock fuse: the next `n` entry mutations fail with
    /// `EngineError::Deadlock`. Test hook.
    pub fn inject_deadlocks(&self, n: u32) {
        self.shared.inner.lock().fault_deadlocks = n;
    }
}

impl Default for MemEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_buf(buf: &mut Vec<u8>, data: &[u8]) {
    buf.clear();
    buf.extend_from_slice(data);
}

impl Engine for MemEngine {
    fn begin(&self) -> Result<TxnId, EngineError> {
        let mut inner = self.shared.inner.lock();
        inner.next_txn += 1;
        let id = inner.next_txn;
        inner.txns.insert(
            id,
            TxnRecord {
                undo: SmallVec::new(),
            },
        );
        Ok(TxnId(id))
    }

    fn commit(&self, txn: TxnId) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        inner
            .txns
            .remove(&txn.0)
            .map(|_| ())
            .ok_or_else(|| EngineError::Other(format!("unknown transaction {txn}")))
    }

    fn abort(&self, txn: TxnId) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        let rec = inner
            .txns
            .remove(&txn.0)
            .ok_or_else(|| EngineError::Other(format!("unknown transaction {txn}")))?;
        for op in rec.undo.into_iter().rev() {
            inner.apply_undo(op);
        }
        Ok(())
    }

    fn open_tree(
        &self,
        txn: Option<TxnId>,
        name: &str,
        opts: TreeOptions,
    ) -> Result<TreeId, EngineError> {
        let mut inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        if let Some(&id) = inner.names.get(name) {
            inner.tree_mut(id)?.refs += 1;
            return Ok(id);
        }
        if !opts.create {
            return Err(EngineError::NotFound);
        }
        inner.next_tree += 1;
        let id = inner.next_tree;
        let mut tree = Tree::new(name, &opts);
        tree.refs = 1;
        inner.names.insert(name.to_string(), id);
        inner.trees.insert(id, tree);
        inner.record_undo(txn, UndoOp::DropTree { id });
        Ok(id)
    }

    fn close_tree(&self, tree: TreeId) {
        let mut inner = self.shared.inner.lock();
        if let Some(t) = inner.trees.get_mut(&tree) {
            t.refs = t.refs.saturating_sub(1);
        }
    }

    fn tree_exists(&self, name: &str) -> bool {
        self.shared.inner.lock().names.contains_key(name)
    }

    fn rename_tree(&self, txn: Option<TxnId>, from: &str, to: &str) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        let id = *inner.names.get(from).ok_or(EngineError::NotFound)?;
        if inner.tree(id)?.refs > 0 {
            return Err(EngineError::Other(format!(
                "tree '{from}' has open handles"
            )));
        }
        if inner.names.contains_key(to) {
            return Err(EngineError::Other(format!("tree '{to}' already exists")));
        }
        inner.names.remove(from);
        inner.names.insert(to.to_string(), id);
        inner.tree_mut(id)?.name = to.to_string();
        inner.record_undo(
            txn,
            UndoOp::Rename {
                from: to.to_string(),
                to: from.to_string(),
            },
        );
        Ok(())
    }

    fn remove_tree(&self, txn: Option<TxnId>, name: &str) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        let id = *inner.names.get(name).ok_or(EngineError::NotFound)?;
        if inner.tree(id)?.refs > 0 {
            return Err(EngineError::Other(format!(
                "tree '{name}' has open handles"
            )));
        }
        let tree = inner
            .trees
            .remove(&id)
            .ok_or_else(|| EngineError::Other(format!("tree '{name}' missing from registry")))?;
        inner.names.remove(name);

        // Strip associations pointing at the removed tree, keeping their
        // undo so an aborted migration re-attaches them.
        let mut stripped: Vec<(TreeId, Assoc)> = Vec::new();
        for (tid, t) in inner.trees.iter_mut() {
            let mut kept = Vec::with_capacity(t.assocs.len());
            for assoc in t.assocs.drain(..) {
                if assoc.secondary == id {
                    stripped.push((*tid, assoc));
                } else {
                    kept.push(assoc);
                }
            }
            t.assocs = kept;
        }
        inner.record_undo(txn, UndoOp::RestoreTree { id, tree });
        for (tid, assoc) in stripped {
            inner.record_undo(txn, UndoOp::RestoreAssoc { tree: tid, assoc });
        }
        Ok(())
    }

    fn put(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), EngineError> {
        self.shared
            .inner
            .lock()
            .put_tree(tree, txn, key, value, false)
    }

    fn get_into(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        let t = inner.tree(tree)?;
        let idx = t.find_exact(key, None).ok_or(EngineError::NotFound)?;
        let stored = &t.entries[idx].1;
        if value.capacity() < stored.len() {
            return Err(EngineError::BufferTooSmall {
                key_len: key.len(),
                value_len: stored.len(),
            });
        }
        fill_buf(value, stored);
        Ok(())
    }

    fn contains(&self, tree: TreeId, txn: Option<TxnId>, key: &[u8]) -> Result<bool, EngineError> {
        let inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        Ok(inner.tree(tree)?.find_exact(key, None).is_some())
    }

    fn delete(&self, tree: TreeId, txn: Option<TxnId>, key: &[u8]) -> Result<bool, EngineError> {
        self.shared
            .inner
            .lock()
            .delete_tree_entry(tree, txn, key, None)
    }

    fn record_count(&self, tree: TreeId) -> Result<u64, EngineError> {
        Ok(self.shared.inner.lock().tree(tree)?.entries.len() as u64)
    }

    fn associate(
        &self,
        txn: Option<TxnId>,
        primary: TreeId,
        secondary: TreeId,
        extract: Extractor,
        populate: bool,
    ) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        inner.tree_mut(secondary)?.primary = Some(primary);
        let assocs = &mut inner.tree_mut(primary)?.assocs;
        // Re-attaching the same secondary replaces the callback.
        assocs.retain(|a| a.secondary != secondary);
        assocs.push(Assoc {
            secondary,
            extract: extract.clone(),
        });
        if populate {
            let snapshot = inner.tree(primary)?.entries.clone();
            for (k, v) in &snapshot {
                if let Some(derived) = extract(k, v) {
                    inner.insert_pair(secondary, txn, &derived, k)?;
                }
            }
        }
        Ok(())
    }

    fn open_cursor(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
    ) -> Result<Box<dyn TreeCursor>, EngineError> {
        let inner = self.shared.inner.lock();
        inner.check_txn(txn)?;
        inner.tree(tree)?;
        Ok(Box::new(MemCursor {
            shared: Arc::clone(&self.shared),
            tree,
            txn,
            pos: None,
        }))
    }
}

struct MemCursor {
    shared: Arc<Shared>,
    tree: TreeId,
    txn: Option<TxnId>,
    /// Key (and duplicate value) identifying the current record; re-located
    /// on every operation.
    pos: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemCursor {
    /// Resolves the current position to an entry index, or `InvalidPosition`
    /// when the record was deleted underneath the cursor.
    fn resolve(&self, tree: &Tree) -> Result<usize, EngineError> {
        let (key, value) = self.pos.as_ref().ok_or(EngineError::InvalidPosition)?;
        let probe = tree.duplicates.then_some(value.as_slice());
        tree.find_exact(key, probe)
            .ok_or(EngineError::InvalidPosition)
    }

    fn read_checked(
        key: &[u8],
        value: &[u8],
        key_buf: &mut Vec<u8>,
        val_buf: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        if key_buf.capacity() < key.len() || val_buf.capacity() < value.len() {
            return Err(EngineError::BufferTooSmall {
                key_len: key.len(),
                value_len: value.len(),
            });
        }
        fill_buf(key_buf, key);
        fill_buf(val_buf, value);
        Ok(())
    }
}

impl TreeCursor for MemCursor {
    fn seek_exact(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        let inner = self.shared.inner.lock();
        let tree = inner.tree(self.tree)?;
        match tree.find_exact(key, None) {
            Some(idx) => {
                self.pos = Some(tree.entries[idx].clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn seek_range(&mut self, key: &[u8]) -> Result<bool, EngineError> {
        let inner = self.shared.inner.lock();
        let tree = inner.tree(self.tree)?;
        let idx = tree.lower_bound(key, None);
        match tree.entries.get(idx) {
            Some(entry) => {
                self.pos = Some(entry.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn step(&mut self, mode: StepMode) -> Result<bool, EngineError> {
        let inner = self.shared.inner.lock();
        let tree = inner.tree(self.tree)?;
        let len = tree.entries.len();
        let next = match &self.pos {
            None => {
                if len == 0 {
                    return Ok(false);
                }
                0
            }
            Some((key, value)) => {
                let probe = tree.duplicates.then_some(value.as_slice());
                let mut idx = tree.lower_bound(key, probe);
                // When the current record still exists the lower bound lands
                // on it; a deleted record's lower bound is already the
                // successor.
                if tree.entry_matches(idx, key, probe) {
                    idx += 1;
                }
                match mode {
                    StepMode::Next => idx,
                    StepMode::NextNoDup => {
                        while idx < len
                            && tree.cmp.compare(&tree.entries[idx].0, key) == Ordering::Equal
                        {
                            idx += 1;
                        }
                        idx
                    }
                    StepMode::NextDup => {
                        if idx < len
                            && tree.cmp.compare(&tree.entries[idx].0, key) == Ordering::Equal
                        {
                            idx
                        } else {
                            return Ok(false);
                        }
                    }
                }
            }
        };
        match tree.entries.get(next) {
            Some(entry) => {
                self.pos = Some(entry.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_into(&mut self, key: &mut Vec<u8>, value: &mut Vec<u8>) -> Result<(), EngineError> {
        let inner = self.shared.inner.lock();
        let tree = inner.tree(self.tree)?;
        let idx = self.resolve(tree)?;
        let (k, v) = &tree.entries[idx];
        Self::read_checked(k, v, key, value)
    }

    fn read_primary_into(
        &mut self,
        key: &mut Vec<u8>,
        value: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let inner = self.shared.inner.lock();
        let tree = inner.tree(self.tree)?;
        let idx = self.resolve(tree)?;
        match tree.primary {
            None => {
                let (k, v) = &tree.entries[idx];
                Self::read_checked(k, v, key, value)
            }
            Some(pid) => {
                let pkey = tree.entries[idx].1.clone();
                let primary = inner.tree(pid)?;
                let pidx = primary
                    .find_exact(&pkey, None)
                    .ok_or(EngineError::InvalidPosition)?;
                Self::read_checked(&pkey, &primary.entries[pidx].1, key, value)
            }
        }
    }

    fn overwrite(&mut self, value: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        let key = {
            let tree = inner.tree(self.tree)?;
            if tree.duplicates {
                return Err(EngineError::Other(
                    "positioned overwrite is not supported on duplicate trees".into(),
                ));
            }
            let idx = self.resolve(tree)?;
            tree.entries[idx].0.clone()
        };
        inner.put_tree(self.tree, self.txn, &key, value, true)
    }

    fn delete_current(&mut self) -> Result<(), EngineError> {
        let mut inner = self.shared.inner.lock();
        let (key, dup_value) = {
            let tree = inner.tree(self.tree)?;
            let idx = self.resolve(tree)?;
            let (k, v) = &tree.entries[idx];
            (k.clone(), tree.duplicates.then(|| v.clone()))
        };
        let removed =
            inner.delete_tree_entry(self.tree, self.txn, &key, dup_value.as_deref())?;
        if !removed {
            return Err(EngineError::InvalidPosition);
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn TreeCursor>, EngineError> {
        Ok(Box::new(MemCursor {
            shared: Arc::clone(&self.shared),
            tree: self.tree,
            txn: self.txn,
            pos: self.pos.clone(),
        }))
    }
}
