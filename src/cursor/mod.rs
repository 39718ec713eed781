//! Cursors over object stores and indexes.
//!
//! # Cursor lifecycle
//!
//! 1. Created by a transaction and positioned on the first row of its range
//! 2. Moved with `advance(count)` or `iterate(target)`
//! 3. Marked for rearm whenever the transaction writes to the scanned store
//! 4. Completes at the end of its range, or errors on a back-end or decode
//!    failure; both are terminal
//! 5. Dropped by its transaction on commit, rollback, or reset

mod cursor;

pub use cursor::{Cursor, CursorState};
