//! Transactions over the backing store.
//!
//! # Transaction lifecycle
//!
//! 1. Established with an id, a mode, and the object stores in scope
//! 2. Begun (`BEGIN IMMEDIATE` for writers, `BEGIN DEFERRED` for readers)
//! 3. Reads, writes, and cursors run inside the SQLite transaction
//! 4. Committed or rolled back; either drops every cursor first
//! 5. Reset rolls back and returns to step 1 without being removed
//!
//! # Cursor invalidation
//!
//! Every write to an object store marks all cursors over that store for
//! rearm; see [`crate::cursor`].

mod transaction;

pub use transaction::{Transaction, TransactionState};
