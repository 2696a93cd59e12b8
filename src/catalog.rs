//! Catalog of maps and their attached indices.
//!
//! Two reserved trees record which maps exist and which index names each map
//! carries. Lifecycle operations (`destroy`, `recreate`) consult them; no
//! data path does. The reserved names themselves are refused by every map
//! lifecycle operation.

use crate::engine::{Engine, EngineError, TreeId, TreeOptions, TxnId};
use std::sync::Arc;

/// Tree holding one row per map.
pub const CATALOG_MAP: &str = "__ordmap.catalog";
/// Tree holding one row per map listing its attached index names.
pub const CATALOG_INDEX_MAP: &str = "__ordmap.catalog.indices";

/// Index names are stored NUL-joined, so NUL is forbidden in index names.
const NAME_SEPARATOR: u8 = 0;

pub fn is_reserved(name: &str) -> bool {
    name == CATALOG_MAP || name == CATALOG_INDEX_MAP
}

pub(crate) struct Catalog {
    engine: Arc<dyn Engine>,
    map_tree: TreeId,
    assoc_tree: TreeId,
}

impl Catalog {
    pub(crate) fn open(engine: &Arc<dyn Engine>) -> Result<Self, EngineError> {
        let opts = || TreeOptions {
            create: true,
            duplicates: false,
            comparator: None,
        };
        let map_tree = engine.open_tree(None, CATALOG_MAP, opts())?;
        let assoc_tree = match engine.open_tree(None, CATALOG_INDEX_MAP, opts()) {
            Ok(t) => t,
            Err(e) => {
                engine.close_tree(map_tree);
                return Err(e);
            }
        };
        Ok(Catalog {
            engine: Arc::clone(engine),
            map_tree,
            assoc_tree,
        })
    }

    pub(crate) fn record_map(
        &self,
        txn: Option<TxnId>,
        name: &str,
        indices: &[String],
    ) -> Result<(), EngineError> {
        self.engine
            .put(self.map_tree, txn, name.as_bytes(), &[])?;
        let mut joined = Vec::new();
        for (i, index) in indices.iter().enumerate() {
            if i > 0 {
                joined.push(NAME_SEPARATOR);
            }
            joined.extend_from_slice(index.as_bytes());
        }
        self.engine
            .put(self.assoc_tree, txn, name.as_bytes(), &joined)
    }

    /// Index names currently associated with `name`; empty when unknown.
    pub(crate) fn indices_for(
        &self,
        txn: Option<TxnId>,
        name: &str,
    ) -> Result<Vec<String>, EngineError> {
        let mut buf = Vec::with_capacity(256);
        loop {
            match self
                .engine
                .get_into(self.assoc_tree, txn, name.as_bytes(), &mut buf)
            {
                Ok(()) => break,
                Err(EngineError::NotFound) => return Ok(Vec::new()),
                Err(EngineError::BufferTooSmall { value_len, .. }) => {
                    buf.reserve(value_len);
                }
                Err(e) => return Err(e),
            }
        }
        if buf.is_empty() {
            return Ok(Vec::new());
        }
        Ok(buf
            .split(|&b| b == NAME_SEPARATOR)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect())
    }

    /// Removes both catalog rows for `name`; absent rows are ignored.
    pub(crate) fn erase(&self, txn: Option<TxnId>, name: &str) -> Result<(), EngineError> {
        self.engine.delete(self.map_tree, txn, name.as_bytes())?;
        self.engine.delete(self.assoc_tree, txn, name.as_bytes())?;
        Ok(())
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.engine.close_tree(self.map_tree);
        self.engine.close_tree(self.assoc_tree);
    }
}
