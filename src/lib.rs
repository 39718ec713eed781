//! # cursordb
//!
//! An embedded object-store database with ordered cursors, built on SQLite.
//!
//! ## Features
//!
//! - **Structured Keys**: numbers, dates, strings, binary, and arrays with a total order
//! - **Object Stores and Indexes**: records keyed by primary key, indexes keyed by value
//! - **Range Cursors**: forward, backward, and duplicate-skipping iteration
//! - **Mutation-Safe Iteration**: cursors resume correctly after writes in their transaction
//! - **Transactions**: read-only, read-write, and version-change scopes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cursordb::{BackingStore, CursorDirection, KeyData, KeyRange, ObjectStoreMetadata, TransactionMode};
//!
//! let mut db = BackingStore::open("./library.db", "library")?;
//! db.get_or_establish_metadata()?;
//!
//! db.establish_transaction(1, vec![], TransactionMode::VersionChange)?;
//! db.begin_transaction(1)?;
//! db.create_object_store(1, &ObjectStoreMetadata::new(1, "books"))?;
//! db.put_record(1, 1, &KeyData::from(7i64), b"dune")?;
//!
//! let (cursor, first) = db.open_cursor(1, 1, None, CursorDirection::Next, KeyRange::all())?;
//! let next = db.advance_cursor(cursor, 1)?;
//! db.commit_transaction(1)?;
//! ```

// Public modules
pub mod error;
pub mod key;
pub mod metadata;
pub mod options;
pub mod types;

// Backing store
mod backing_store;

// Internal modules
mod cursor;
mod metrics;
mod record;
mod transaction;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use key::{KeyData, KeyRange};
pub use metadata::{DatabaseMetadata, IndexMetadata, ObjectStoreMetadata};
pub use options::{JournalMode, Options, OptionsBuilder, SyncMode};
pub use types::{
    CursorDirection, CursorId, CursorRecord, CursorType, IndexGetResult, IndexId, ObjectStoreId,
    TransactionId, TransactionMode,
};

// Backing store
pub use backing_store::{BackingStore, MAX_GENERATED_KEY};

// Cursors
pub use cursor::{Cursor, CursorState};

// Metrics
pub use metrics::{Counter, Gauge, MetricsSummary, StoreMetrics};

// Transactions
pub use transaction::{Transaction, TransactionState};
