//! Record Store: the relational tables behind object stores and indexes.
//!
//! Keys are stored as order-preserving BLOBs, so every range predicate and
//! `ORDER BY` is evaluated natively by SQLite.

mod query;
mod schema;
mod store;

pub use query::{RangeQuery, RawRow, ScanBounds, ScanSource};
pub use store::RecordStore;
