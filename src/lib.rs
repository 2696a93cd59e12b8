//! # ordmap - Embedded Transactional Ordered Key-Value Store
//!
//! ordmap is an embedded store of ordered byte-key/byte-value maps with
//! application-defined secondary indices, layered over a pluggable B-tree
//! engine. The library prioritizes:
//!
//! - **Transparent contention handling**: single auto-committed operations
//!   retry deadlocks internally; caller-owned transactions surface them once
//! - **Index consistency**: secondary indices are maintained inside the same
//!   unit of work as the primary write, always
//! - **Caller-controlled memory**: reads go through caller-sized buffers
//!   grown on demand, never engine-side allocation
//!
//! ## Quick Start
//!
//! ```ignore
//! use ordmap::{Connection, IndexSpec, MapSpec, MemEngine};
//! use std::sync::Arc;
//!
//! let conn = Connection::open(Arc::new(MemEngine::new()));
//! let users = conn.open_map(
//!     MapSpec::new("users")
//!         .with_index(IndexSpec::new("by_email", |_key, value| {
//!             Some(value.to_vec())
//!         })),
//! )?;
//!
//! users.put(b"u1", b"alice@example.com")?;
//!
//! if let Some(iter) = users.index("by_email")?.find(b"alice@example.com")? {
//!     let (key, value) = iter.get()?;
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   Public API (Connection / Map / Index)   │
//! ├──────────────────────────────────────────┤
//! │  Deadlock-Retry Policy │ Iterator Layer   │
//! ├────────────────────────┼─────────────────┤
//! │   Catalog (reserved)   │  Txn Bindings    │
//! ├──────────────────────────────────────────┤
//! │        Engine Seam (Engine trait)         │
//! ├──────────────────────────────────────────┤
//! │   B-Tree Engine (MemEngine reference)     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Transactions
//!
//! Each [`Connection`] carries at most one explicit [`Transaction`] at a
//! time. Operations issued while it is active join it; operations issued
//! outside it wrap themselves in implicit units of work and absorb deadlocks
//! by retrying. Iterators opened outside an explicit transaction own an
//! implicit transaction for their whole lifetime.
//!
//! ## Module Overview
//!
//! - [`engine`]: the backing-engine seam and the in-memory reference engine
//! - `map`: primary maps, iterators, secondary indices, lifecycle
//! - `catalog`: reserved trees recording maps and their index names
//! - `comparator`: key-ordering seam
//! - `connection`: engine binding, explicit transactions, shared handles
//! - `errors`: the closed error taxonomy

mod catalog;
mod comparator;
mod connection;
pub mod engine;
mod errors;
mod map;

pub use catalog::{is_reserved, CATALOG_INDEX_MAP, CATALOG_MAP};
pub use comparator::{Comparator, LexicalComparator};
pub use connection::{Connection, ConnectionOptions, Transaction};
pub use engine::{Engine, MemEngine, StepMode, TreeCursor, TxnId};
pub use errors::{Result, StoreError};
pub use map::{Index, IndexSpec, Iter, Map, MapSpec};
