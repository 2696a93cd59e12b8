//! # Backing Engine Interface
//!
//! The map/iterator/index core is layered over a page-oriented B-tree engine
//! that supplies ordered trees, cursors, row-level locking and transactions.
//! This module defines the seam between the two: a small set of traits plus
//! the closed status enum the core matches on.
//!
//! ## Status Classification
//!
//! Every engine failure is classified into exactly one [`EngineError`]
//! variant. The core never inspects raw status codes; the retry policy in
//! `map` matches on `Deadlock` exhaustively and treats everything else as
//! fatal to the current operation.
//!
//! ## Trees and Associations
//!
//! A tree is a named, ordered key-value structure. Primary trees hold unique
//! keys; secondary (index) trees are opened with `duplicates: true` and hold
//! derived-key -> primary-key pairs. [`Engine::associate`] registers a typed
//! extraction callback so that every future write to the primary tree keeps
//! the secondary tree synchronized inside the same unit of work.
//!
//! ## Buffer Contract
//!
//! `get_into` and [`TreeCursor::read_into`] write into caller-supplied
//! buffers and never allocate on the caller's behalf. When a buffer's
//! capacity is insufficient the engine reports `BufferTooSmall` with the
//! exact sizes required; callers grow and retry. The iterator layer starts at
//! a 1 KiB minimum and resizes to fit rather than pre-sizing to a worst case.
//!
//! ## Transactions
//!
//! Transactions are identified by [`TxnId`]. Every data operation takes an
//! optional transaction; `None` means the operation is independently atomic
//! (engine-level autocommit). Commit and abort consume the id.

mod mem;

pub use mem::MemEngine;

use crate::comparator::Comparator;
use std::fmt;
use std::sync::Arc;

/// Opaque handle to an open tree.
pub type TreeId = u64;

/// Engine transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Closed classification of engine outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No record matched the request.
    NotFound,
    /// A unique-tree insert collided with an existing key.
    KeyExists,
    /// The engine detected a lock cycle and chose this operation as victim.
    Deadlock,
    /// A caller-supplied buffer cannot hold the record; carries the sizes
    /// needed for a successful retry.
    BufferTooSmall { key_len: usize, value_len: usize },
    /// The cursor's current record no longer exists.
    InvalidPosition,
    /// Any other engine failure (I/O, corruption, schema mismatch).
    Other(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound => write!(f, "not found"),
            EngineError::KeyExists => write!(f, "key already exists"),
            EngineError::Deadlock => write!(f, "deadlock"),
            EngineError::BufferTooSmall { key_len, value_len } => {
                write!(f, "buffer too small (key {key_len}, value {value_len})")
            }
            EngineError::InvalidPosition => write!(f, "invalid cursor position"),
            EngineError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Options for opening a tree.
#[derive(Clone, Default)]
pub struct TreeOptions {
    /// Create the tree if it does not exist.
    pub create: bool,
    /// Allow duplicate keys (sorted by value bytes within one key).
    pub duplicates: bool,
    /// Custom key order; byte-lexicographic when absent.
    pub comparator: Option<Arc<dyn Comparator>>,
}

/// Secondary-key extraction callback registered via [`Engine::associate`].
///
/// Receives the primary key and value of the record being written and returns
/// the derived key to index it under, or `None` to leave the record out of
/// the index. Must be a pure function of its inputs.
pub type Extractor = Arc<dyn Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Cursor advance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Next record in comparator order.
    Next,
    /// Next record with a key different from the current one.
    NextNoDup,
    /// Next record within the current key's duplicate run; fails to advance
    /// when the run is exhausted.
    NextDup,
}

/// The backing B-tree engine.
pub trait Engine: Send + Sync {
    fn begin(&self) -> Result<TxnId, EngineError>;
    fn commit(&self, txn: TxnId) -> Result<(), EngineError>;
    fn abort(&self, txn: TxnId) -> Result<(), EngineError>;

    fn open_tree(
        &self,
        txn: Option<TxnId>,
        name: &str,
        opts: TreeOptions,
    ) -> Result<TreeId, EngineError>;
    fn close_tree(&self, tree: TreeId);
    fn tree_exists(&self, name: &str) -> bool;
    /// Renames a tree with no open handles.
    fn rename_tree(&self, txn: Option<TxnId>, from: &str, to: &str) -> Result<(), EngineError>;
    /// Physically removes a tree with no open handles. Associations pointing
    /// at the removed tree are dropped.
    fn remove_tree(&self, txn: Option<TxnId>, name: &str) -> Result<(), EngineError>;

    fn put(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), EngineError>;
    /// Reads a value into `value` respecting its capacity (see the module
    /// docs for the buffer contract).
    fn get_into(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
        key: &[u8],
        value: &mut Vec<u8>,
    ) -> Result<(), EngineError>;
    /// Existence probe; does not touch the value bytes.
    fn contains(&self, tree: TreeId, txn: Option<TxnId>, key: &[u8]) -> Result<bool, EngineError>;
    /// Returns whether a record was removed.
    fn delete(&self, tree: TreeId, txn: Option<TxnId>, key: &[u8]) -> Result<bool, EngineError>;
    /// Engine-maintained record count (a stat read, not a scan).
    fn record_count(&self, tree: TreeId) -> Result<u64, EngineError>;

    /// Registers `secondary` as an index over `primary` maintained through
    /// `extract`. When `populate` is set, existing primary records are
    /// scanned and indexed immediately.
    fn associate(
        &self,
        txn: Option<TxnId>,
        primary: TreeId,
        secondary: TreeId,
        extract: Extractor,
        populate: bool,
    ) -> Result<(), EngineError>;

    fn open_cursor(
        &self,
        tree: TreeId,
        txn: Option<TxnId>,
    ) -> Result<Box<dyn TreeCursor>, EngineError>;
}

/// A positionable handle into one tree.
///
/// Cursors are owned by exactly one iterator and are not safe for concurrent
/// use. A cursor opened on a secondary tree resolves `read_primary_into`
/// through the association to the primary record.
pub trait TreeCursor: Send {
    /// Positions exactly on `key` (first duplicate for duplicate trees).
    fn seek_exact(&mut self, key: &[u8]) -> Result<bool, EngineError>;
    /// Positions on the smallest stored key >= `key`.
    fn seek_range(&mut self, key: &[u8]) -> Result<bool, EngineError>;
    /// Advances (or performs initial positioning when unpositioned).
    fn step(&mut self, mode: StepMode) -> Result<bool, EngineError>;
    /// Reads the record at the current position into the supplied buffers,
    /// honoring the capacity contract.
    fn read_into(&mut self, key: &mut Vec<u8>, value: &mut Vec<u8>) -> Result<(), EngineError>;
    /// Like `read_into`, but on a secondary cursor yields the primary
    /// key/value pair instead of the derived pair.
    fn read_primary_into(
        &mut self,
        key: &mut Vec<u8>,
        value: &mut Vec<u8>,
    ) -> Result<(), EngineError>;
    /// Overwrites the value at the current position (unique trees only).
    fn overwrite(&mut self, value: &[u8]) -> Result<(), EngineError>;
    /// Deletes the record at the current position; a following `step`
    /// lands on the successor.
    fn delete_current(&mut self) -> Result<(), EngineError>;
    /// Duplicates the cursor at its current position under the same
    /// transaction binding.
    fn try_clone(&self) -> Result<Box<dyn TreeCursor>, EngineError>;
}
