//! Core types for cursordb.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::key::KeyData;

/// Caller-assigned transaction identifier.
pub type TransactionId = u64;

/// Store-assigned cursor identifier.
pub type CursorId = u64;

/// Object store identifier (matches the `objectStoreID` column).
pub type ObjectStoreId = i64;

/// Index identifier, unique within its object store.
pub type IndexId = i64;

/// Direction and duplicate handling of a cursor scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Ascending, every record.
    #[default]
    Next,
    /// Ascending, first record of each distinct key.
    NextNoDuplicate,
    /// Descending, every record.
    Prev,
    /// Descending, first record of each distinct key.
    PrevNoDuplicate,
}

impl CursorDirection {
    /// True for the ascending directions.
    pub fn is_next_family(self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextNoDuplicate)
    }

    /// True for the directions that skip records sharing a key.
    pub fn is_unique(self) -> bool {
        matches!(
            self,
            CursorDirection::NextNoDuplicate | CursorDirection::PrevNoDuplicate
        )
    }

    /// Whether `current` has reached `target` when moving in this direction.
    pub fn has_reached(self, current: &KeyData, target: &KeyData) -> bool {
        let ord = current.compare(target);
        if self.is_next_family() {
            ord != Ordering::Less
        } else {
            ord != Ordering::Greater
        }
    }
}

/// What a single-record index lookup returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorType {
    /// Key, primary key, and value.
    #[default]
    KeyAndValue,
    /// Key and primary key only.
    KeyOnly,
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Record reads and writes within the declared scope.
    ReadWrite,
    /// Full access including schema changes.
    VersionChange,
}

impl TransactionMode {
    /// Check if record writes are permitted.
    pub fn is_writable(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

/// Position reported by a cursor after open/advance/iterate.
///
/// A cursor at the end of its range reports `key == None`,
/// `primary_key == None` and an empty value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CursorRecord {
    /// Current key (index key for index cursors).
    pub key: Option<KeyData>,
    /// Primary key of the current record.
    pub primary_key: Option<KeyData>,
    /// Serialized value of the current record.
    pub value: Bytes,
}

impl CursorRecord {
    /// Check if this record marks the end of the range.
    pub fn is_end(&self) -> bool {
        self.key.is_none()
    }
}

/// Result of a single-record index lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGetResult {
    /// Index key of the first matching entry.
    pub key: KeyData,
    /// Primary key it references.
    pub primary_key: KeyData,
    /// Record value, present for `CursorType::KeyAndValue`.
    pub value: Option<Bytes>,
}
