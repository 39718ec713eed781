//! Transaction - one atomic scope over the record tables.
//!
//! A transaction owns:
//! - The SQLite transaction it wraps (begun, committed, or rolled back here)
//! - Every cursor created inside it, keyed by cursor id
//! - Fan-out of write notifications to the cursors over the written store

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use crate::cursor::Cursor;
use crate::key::{KeyData, KeyRange};
use crate::metrics::StoreMetrics;
use crate::record::ScanSource;
use crate::types::{CursorDirection, CursorId, CursorRecord, ObjectStoreId, TransactionId, TransactionMode};
use crate::{Error, Result};

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Registered but not yet begun.
    Established,
    /// Begun; reads and writes are allowed.
    Active,
    /// Committed successfully.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// A transaction and the cursors living inside it.
///
/// Cursors never outlive the transaction: commit, rollback, and reset drop
/// every cursor before the SQLite transaction is released.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    mode: TransactionMode,
    /// Object stores this transaction may touch (ignored for version change).
    object_store_ids: Vec<ObjectStoreId>,
    state: TransactionState,
    cursors: HashMap<CursorId, Cursor>,
    metrics: Arc<StoreMetrics>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        object_store_ids: Vec<ObjectStoreId>,
        mode: TransactionMode,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        Self {
            id,
            mode,
            object_store_ids,
            state: TransactionState::Established,
            cursors: HashMap::new(),
            metrics,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn object_store_ids(&self) -> &[ObjectStoreId] {
        &self.object_store_ids
    }

    /// Check if the transaction has begun and not yet finished.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of live cursors.
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Begin the underlying SQLite transaction.
    pub fn begin(&mut self, conn: &Connection) -> Result<()> {
        match self.state {
            TransactionState::Established => {}
            TransactionState::Active => return Err(Error::TransactionInProgress(self.id)),
            _ => return Err(Error::TransactionNotActive(self.id)),
        }

        // Writers take the write lock up front.
        let sql = if self.mode.is_writable() {
            "BEGIN IMMEDIATE"
        } else {
            "BEGIN DEFERRED"
        };
        conn.execute_batch(sql)?;

        self.state = TransactionState::Active;
        self.metrics.txn_begin.inc();
        debug!(transaction_id = self.id, mode = ?self.mode, "began transaction");
        Ok(())
    }

    /// Commit. Returns the ids of the cursors that were dropped.
    pub fn commit(&mut self, conn: &Connection) -> Result<Vec<CursorId>> {
        self.check_active()?;
        let closed = self.clear_cursors();

        conn.execute_batch("COMMIT")?;
        self.state = TransactionState::Committed;
        self.metrics.txn_commit.inc();
        debug!(transaction_id = self.id, "committed transaction");
        Ok(closed)
    }

    /// Roll back and finish. Returns the ids of the cursors that were dropped.
    pub fn rollback(&mut self, conn: &Connection) -> Result<Vec<CursorId>> {
        let closed = match self.state {
            TransactionState::Active => self.abort(conn)?,
            TransactionState::Established => Vec::new(),
            _ => return Err(Error::TransactionNotActive(self.id)),
        };

        self.state = TransactionState::RolledBack;
        self.metrics.txn_rollback.inc();
        debug!(transaction_id = self.id, "rolled back transaction");
        Ok(closed)
    }

    /// Roll back any work and return to the established state so the
    /// transaction can begin again.
    pub fn reset(&mut self, conn: &Connection) -> Result<Vec<CursorId>> {
        let closed = match self.state {
            TransactionState::Active => self.abort(conn)?,
            TransactionState::Established => Vec::new(),
            _ => return Err(Error::TransactionNotActive(self.id)),
        };

        self.state = TransactionState::Established;
        debug!(transaction_id = self.id, "reset transaction");
        Ok(closed)
    }

    fn abort(&mut self, conn: &Connection) -> Result<Vec<CursorId>> {
        let closed = self.clear_cursors();
        conn.execute_batch("ROLLBACK")?;
        Ok(closed)
    }

    pub fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionNotActive(self.id))
        }
    }

    /// Check that records may be written.
    pub fn check_writable(&self) -> Result<()> {
        self.check_active()?;
        if !self.mode.is_writable() {
            return Err(Error::ReadOnlyTransaction(self.id));
        }
        Ok(())
    }

    /// Check that the schema may be changed.
    pub fn check_version_change(&self) -> Result<()> {
        self.check_active()?;
        if self.mode != TransactionMode::VersionChange {
            return Err(Error::VersionChangeRequired(self.id));
        }
        Ok(())
    }

    /// Check that an object store is in scope.
    pub fn check_scope(&self, object_store_id: ObjectStoreId) -> Result<()> {
        if self.mode == TransactionMode::VersionChange
            || self.object_store_ids.contains(&object_store_id)
        {
            Ok(())
        } else {
            Err(Error::NotInScope {
                transaction_id: self.id,
                object_store_id,
            })
        }
    }

    /// Create and register a cursor, returning its first position.
    pub(crate) fn open_cursor(
        &mut self,
        conn: &Connection,
        cursor_id: CursorId,
        source: ScanSource,
        direction: CursorDirection,
        key_range: KeyRange,
        page_size: usize,
    ) -> Result<CursorRecord> {
        self.check_active()?;
        self.check_scope(source.object_store_id())?;

        let cursor = Cursor::try_create(
            conn,
            cursor_id,
            source,
            direction,
            key_range,
            page_size,
            Arc::clone(&self.metrics),
        )?;
        let record = cursor.record();

        self.cursors.insert(cursor_id, cursor);
        self.metrics.cursors_opened.inc();
        self.metrics.open_cursors.inc();
        Ok(record)
    }

    pub fn cursor(&self, cursor_id: CursorId) -> Option<&Cursor> {
        self.cursors.get(&cursor_id)
    }

    /// Advance a cursor owned by this transaction.
    pub fn advance_cursor(
        &mut self,
        conn: &Connection,
        cursor_id: CursorId,
        count: u32,
    ) -> Result<CursorRecord> {
        let cursor = self.active_cursor(cursor_id)?;
        cursor.advance(conn, count)?;
        Ok(cursor.record())
    }

    /// Iterate a cursor owned by this transaction toward `target`.
    pub fn iterate_cursor(
        &mut self,
        conn: &Connection,
        cursor_id: CursorId,
        target: Option<&KeyData>,
    ) -> Result<CursorRecord> {
        let cursor = self.active_cursor(cursor_id)?;
        cursor.iterate(conn, target)?;
        Ok(cursor.record())
    }

    fn active_cursor(&mut self, cursor_id: CursorId) -> Result<&mut Cursor> {
        self.check_active()?;
        self.cursors
            .get_mut(&cursor_id)
            .ok_or(Error::UnknownCursor(cursor_id))
    }

    /// Drop one cursor. Returns whether it existed.
    pub fn close_cursor(&mut self, cursor_id: CursorId) -> bool {
        let removed = self.cursors.remove(&cursor_id).is_some();
        if removed {
            self.metrics.open_cursors.dec();
        }
        removed
    }

    /// Mark every cursor over `object_store_id` for rearm.
    pub fn notify_cursors_of_changes(&mut self, object_store_id: ObjectStoreId) {
        let mut notified = 0;
        for cursor in self.cursors.values_mut() {
            if cursor.object_store_id() == object_store_id {
                cursor.mark_records_changed();
                notified += 1;
            }
        }
        if notified > 0 {
            debug!(transaction_id = self.id, object_store_id, notified, "cursors marked for rearm");
        }
    }

    /// Drop every cursor, returning their ids.
    pub fn clear_cursors(&mut self) -> Vec<CursorId> {
        let closed: Vec<CursorId> = self.cursors.drain().map(|(id, _)| id).collect();
        self.metrics.open_cursors.sub(closed.len() as u64);
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::encode_key;
    use crate::record::RecordStore;

    fn setup() -> (Connection, Arc<StoreMetrics>) {
        let conn = Connection::open_in_memory().unwrap();
        let store = RecordStore::new(&conn);
        store.create_tables().unwrap();
        for i in 1..=3i64 {
            store.put_record(1, &encode_key(&KeyData::from(i)), b"v").unwrap();
        }
        (conn, Arc::new(StoreMetrics::new()))
    }

    #[test]
    fn test_lifecycle() {
        let (conn, metrics) = setup();
        let mut txn = Transaction::new(1, vec![1], TransactionMode::ReadWrite, metrics.clone());
        assert_eq!(txn.state(), TransactionState::Established);
        assert!(txn.check_active().is_err());

        txn.begin(&conn).unwrap();
        assert!(txn.is_active());
        assert_eq!(txn.begin(&conn), Err(Error::TransactionInProgress(1)));

        txn.commit(&conn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.rollback(&conn), Err(Error::TransactionNotActive(1)));
        assert_eq!(metrics.txn_commit.get(), 1);
    }

    #[test]
    fn test_mode_and_scope_checks() {
        let (conn, metrics) = setup();

        let mut reader = Transaction::new(1, vec![1], TransactionMode::ReadOnly, metrics.clone());
        reader.begin(&conn).unwrap();
        assert_eq!(reader.check_writable(), Err(Error::ReadOnlyTransaction(1)));
        assert_eq!(reader.check_version_change(), Err(Error::VersionChangeRequired(1)));
        assert!(reader.check_scope(1).is_ok());
        assert!(matches!(reader.check_scope(2), Err(Error::NotInScope { .. })));
        reader.rollback(&conn).unwrap();

        let upgrade = Transaction::new(2, vec![], TransactionMode::VersionChange, metrics);
        assert!(upgrade.check_scope(42).is_ok());
    }

    #[test]
    fn test_cursors_dropped_on_reset() {
        let (conn, metrics) = setup();
        let mut txn = Transaction::new(1, vec![1], TransactionMode::ReadWrite, metrics.clone());
        txn.begin(&conn).unwrap();

        let first = txn
            .open_cursor(&conn, 10, ScanSource::ObjectStore(1), CursorDirection::Next, KeyRange::all(), 8)
            .unwrap();
        assert_eq!(first.key, Some(KeyData::from(1i64)));
        assert_eq!(metrics.open_cursors.get(), 1);
        assert_eq!(metrics.cursors_opened.get(), 1);

        let next = txn.advance_cursor(&conn, 10, 1).unwrap();
        assert_eq!(next.key, Some(KeyData::from(2i64)));

        assert_eq!(txn.reset(&conn).unwrap(), vec![10]);
        assert_eq!(txn.state(), TransactionState::Established);
        assert_eq!(metrics.open_cursors.get(), 0);

        txn.begin(&conn).unwrap();
        assert_eq!(txn.advance_cursor(&conn, 10, 1), Err(Error::UnknownCursor(10)));
    }

    #[test]
    fn test_notify_marks_only_matching_store() {
        let (conn, metrics) = setup();
        let mut txn = Transaction::new(1, vec![1, 2], TransactionMode::ReadWrite, metrics);
        txn.begin(&conn).unwrap();

        txn.open_cursor(&conn, 1, ScanSource::ObjectStore(1), CursorDirection::Next, KeyRange::all(), 8)
            .unwrap();
        txn.open_cursor(&conn, 2, ScanSource::ObjectStore(2), CursorDirection::Next, KeyRange::all(), 8)
            .unwrap();

        txn.notify_cursors_of_changes(1);
        assert!(txn.cursor(1).unwrap().needs_rearm());
        assert!(!txn.cursor(2).unwrap().needs_rearm());

        assert!(txn.close_cursor(2));
        assert!(!txn.close_cursor(2));
        assert_eq!(txn.cursor_count(), 1);
    }
}
