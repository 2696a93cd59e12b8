//! # Secondary Indices
//!
//! An [`Index`] is a secondary tree of derived-key -> primary-key pairs,
//! kept synchronized with its primary map by the engine's association
//! mechanism. Indices are read-only surfaces: the only way records enter or
//! leave an index is through writes to the primary map.
//!
//! An index belongs to exactly one map for its whole lifetime. Attachment
//! happens during `Map::open`; a freshly created secondary tree is populated
//! from existing primary records, an existing one is trusted as-is.
//!
//! Duplicate derived keys are expected (many primary records can share one
//! derived key), so the secondary tree is opened in duplicate mode and
//! `find` confines its iterator to the matching duplicate run.

use crate::comparator::{self, Comparator};
use crate::connection::Connection;
use crate::engine::{StepMode, TreeId, TreeOptions};
use crate::errors::{Result, StoreError};
use std::sync::{Arc, Weak};

use super::iter::SeekTarget;
use super::{index_tree_name, run_txn, IndexSpec, Iter, Map};

/// A secondary index attached to one map.
pub struct Index {
    name: String,
    map_name: String,
    conn: Arc<Connection>,
    map: Weak<Map>,
    tree: TreeId,
    comparator: Option<Arc<dyn Comparator>>,
}

impl Index {
    /// Opens the secondary tree and registers the association with the
    /// primary. Population runs only when the tree did not exist before.
    pub(crate) fn attach(map: &Arc<Map>, spec: IndexSpec) -> Result<Arc<Index>> {
        let engine = map.conn().engine();
        let tree_name = index_tree_name(map.name(), &spec.name);
        let existed = engine.tree_exists(&tree_name);
        let tree = engine.open_tree(
            None,
            &tree_name,
            TreeOptions {
                create: true,
                duplicates: true,
                comparator: spec.comparator.clone(),
            },
        )?;
        if let Err(e) = engine.associate(None, map.tree_id()?, tree, spec.extract, !existed) {
            engine.close_tree(tree);
            return Err(e.into());
        }
        if map.conn().trace_level() >= 1 {
            tracing::debug!(map = %map.name(), index = %spec.name, populated = !existed, "index attached");
        }
        Ok(Arc::new(Index {
            name: spec.name,
            map_name: map.name().to_string(),
            conn: Arc::clone(map.conn()),
            map: Arc::downgrade(map),
            tree,
            comparator: spec.comparator,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compare_enabled(&self) -> bool {
        self.comparator.is_some()
    }

    /// Iterator over the whole index in derived-key order.
    pub fn begin(&self) -> Result<Option<Iter>> {
        self.open_iter(SeekTarget::First, None)
    }

    /// Iterator confined to the duplicate run of `derived`; `next` walks the
    /// primary records sharing that derived key and stops at the run's end.
    pub fn find(&self, derived: &[u8]) -> Result<Option<Iter>> {
        self.open_iter(SeekTarget::Find(derived), Some(derived.to_vec()))
    }

    /// Iterator on the smallest derived key >= `derived`.
    pub fn lower_bound(&self, derived: &[u8]) -> Result<Option<Iter>> {
        self.open_iter(SeekTarget::LowerBound(derived), None)
    }

    /// Iterator on the smallest derived key strictly greater than `derived`.
    pub fn upper_bound(&self, derived: &[u8]) -> Result<Option<Iter>> {
        self.open_iter(SeekTarget::UpperBound(derived), None)
    }

    /// Number of primary records indexed under `derived`.
    pub fn count(&self, derived: &[u8]) -> Result<usize> {
        run_txn(&self.conn, &self.map_name, "index count", |txn| {
            let mut cursor = self
                .conn
                .engine()
                .open_cursor(self.tree, Some(txn))
                .map_err(StoreError::from)?;
            if !cursor.seek_exact(derived).map_err(StoreError::from)? {
                return Ok(0);
            }
            let mut n = 1;
            while cursor.step(StepMode::NextDup).map_err(StoreError::from)? {
                n += 1;
            }
            Ok(n)
        })
    }

    fn open_iter(&self, target: SeekTarget<'_>, dup_key: Option<Vec<u8>>) -> Result<Option<Iter>> {
        let map = self
            .map
            .upgrade()
            .ok_or_else(|| StoreError::MapClosed(self.map_name.clone()))?;
        map.check_open()?;
        Iter::open_on(
            &map,
            self.tree,
            true,
            dup_key,
            comparator::resolve(self.comparator.as_ref()),
            self.comparator.is_some(),
            target,
        )
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.conn.engine().close_tree(self.tree);
    }
}
