//! Record and index record CRUD.

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::trace;

use super::query::{ScanBounds, ScanSource};
use crate::types::{IndexId, ObjectStoreId};
use crate::{Error, Result};

/// Relational view of the record tables, borrowed from a connection.
///
/// Keys passed in and out are already encoded; see [`crate::key::encode_key`].
#[derive(Clone, Copy)]
pub struct RecordStore<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> RecordStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Current value of an object store's key generator.
    pub fn key_generator_value(&self, object_store_id: ObjectStoreId) -> Result<i64> {
        self.conn
            .prepare_cached("SELECT currentKey FROM KeyGenerators WHERE objectStoreID = ?1")?
            .query_row(params![object_store_id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::not_found(format!("key generator for object store {}", object_store_id)))
    }

    /// Overwrite an object store's key generator.
    pub fn set_key_generator_value(&self, object_store_id: ObjectStoreId, value: i64) -> Result<()> {
        let updated = self
            .conn
            .prepare_cached("UPDATE KeyGenerators SET currentKey = ?2 WHERE objectStoreID = ?1")?
            .execute(params![object_store_id, value])?;
        if updated == 0 {
            return Err(Error::not_found(format!(
                "key generator for object store {}",
                object_store_id
            )));
        }
        Ok(())
    }

    /// Check if a record with this key exists.
    pub fn record_exists(&self, object_store_id: ObjectStoreId, key: &[u8]) -> Result<bool> {
        let found = self
            .conn
            .prepare_cached("SELECT 1 FROM Records WHERE objectStoreID = ?1 AND key = ?2")?
            .query_row(params![object_store_id, key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or overwrite a record.
    ///
    /// Overwriting keeps the row identifier of the existing row and drops
    /// the index entries that pointed at the old value.
    pub fn put_record(&self, object_store_id: ObjectStoreId, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO Records (objectStoreID, key, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(objectStoreID, key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![object_store_id, key, value])?;
        self.delete_index_entries_for(object_store_id, key)?;
        trace!(object_store_id, key_len = key.len(), value_len = value.len(), "put record");
        Ok(())
    }

    /// Value of the record with this key.
    pub fn get_record(&self, object_store_id: ObjectStoreId, key: &[u8]) -> Result<Option<Bytes>> {
        let value: Option<Vec<u8>> = self
            .conn
            .prepare_cached("SELECT value FROM Records WHERE objectStoreID = ?1 AND key = ?2")?
            .query_row(params![object_store_id, key], |row| row.get(0))
            .optional()?;
        Ok(value.map(Bytes::from))
    }

    /// First record (lowest key) inside the bounds, as `(key, value)`.
    pub fn first_record_in(
        &self,
        object_store_id: ObjectStoreId,
        bounds: &ScanBounds,
    ) -> Result<Option<(Bytes, Bytes)>> {
        let sql = format!(
            "SELECT key, value FROM Records WHERE objectStoreID = ?1 AND {} ORDER BY key ASC LIMIT 1",
            bounds.predicate(2, 3)
        );
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .prepare_cached(&sql)?
            .query_row(
                params![object_store_id, bounds.lower.as_ref(), bounds.upper.as_ref()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(key, value)| (Bytes::from(key), Bytes::from(value))))
    }

    /// Delete one record and its index entries. Returns whether it existed.
    pub fn delete_record(&self, object_store_id: ObjectStoreId, key: &[u8]) -> Result<bool> {
        let deleted = self
            .conn
            .prepare_cached("DELETE FROM Records WHERE objectStoreID = ?1 AND key = ?2")?
            .execute(params![object_store_id, key])?;
        self.delete_index_entries_for(object_store_id, key)?;
        Ok(deleted > 0)
    }

    /// Delete every record inside the bounds together with its index entries.
    pub fn delete_range(&self, object_store_id: ObjectStoreId, bounds: &ScanBounds) -> Result<usize> {
        let predicate = bounds.predicate(2, 3);
        let index_sql = format!(
            "DELETE FROM IndexRecords WHERE objectStoreID = ?1 AND value IN \
             (SELECT key FROM Records WHERE objectStoreID = ?1 AND {})",
            predicate
        );
        let record_sql = format!(
            "DELETE FROM Records WHERE objectStoreID = ?1 AND {}",
            predicate
        );
        let (lower, upper) = (bounds.lower.as_ref(), bounds.upper.as_ref());

        self.conn
            .prepare_cached(&index_sql)?
            .execute(params![object_store_id, lower, upper])?;
        let deleted = self
            .conn
            .prepare_cached(&record_sql)?
            .execute(params![object_store_id, lower, upper])?;
        Ok(deleted)
    }

    /// Delete all records and index entries of an object store.
    pub fn clear_records(&self, object_store_id: ObjectStoreId) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM Records WHERE objectStoreID = ?1")?
            .execute(params![object_store_id])?;
        self.conn
            .prepare_cached("DELETE FROM IndexRecords WHERE objectStoreID = ?1")?
            .execute(params![object_store_id])?;
        Ok(())
    }

    /// Add an index entry mapping `key` to `primary_key`.
    ///
    /// For unique indexes an entry for the same key pointing at another
    /// primary key is a constraint violation. Re-adding an identical entry
    /// is a no-op.
    pub fn put_index_record(
        &self,
        object_store_id: ObjectStoreId,
        index_id: IndexId,
        key: &[u8],
        primary_key: &[u8],
        unique: bool,
    ) -> Result<()> {
        if unique {
            let existing: Option<Vec<u8>> = self
                .conn
                .prepare_cached(
                    "SELECT value FROM IndexRecords \
                     WHERE objectStoreID = ?1 AND indexID = ?2 AND key = ?3 AND value != ?4 LIMIT 1",
                )?
                .query_row(params![object_store_id, index_id, key, primary_key], |row| row.get(0))
                .optional()?;
            if existing.is_some() {
                return Err(Error::ConstraintViolation(format!(
                    "unique index {} on object store {} already contains this key",
                    index_id, object_store_id
                )));
            }
        }

        self.conn
            .prepare_cached(
                "INSERT INTO IndexRecords (indexID, objectStoreID, key, value) \
                 SELECT ?1, ?2, ?3, ?4 WHERE NOT EXISTS (SELECT 1 FROM IndexRecords \
                 WHERE indexID = ?1 AND objectStoreID = ?2 AND key = ?3 AND value = ?4)",
            )?
            .execute(params![index_id, object_store_id, key, primary_key])?;
        Ok(())
    }

    /// Count rows inside the bounds.
    pub fn count(&self, source: ScanSource, bounds: &ScanBounds) -> Result<u64> {
        let count: i64 = match source {
            ScanSource::ObjectStore(object_store_id) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM Records WHERE objectStoreID = ?1 AND {}",
                    bounds.predicate(2, 3)
                );
                self.conn.prepare_cached(&sql)?.query_row(
                    params![object_store_id, bounds.lower.as_ref(), bounds.upper.as_ref()],
                    |row| row.get(0),
                )?
            }
            ScanSource::Index {
                object_store_id,
                index_id,
            } => {
                let sql = format!(
                    "SELECT COUNT(*) FROM IndexRecords WHERE objectStoreID = ?1 AND indexID = ?2 AND {}",
                    bounds.predicate(3, 4)
                );
                self.conn.prepare_cached(&sql)?.query_row(
                    params![
                        object_store_id,
                        index_id,
                        bounds.lower.as_ref(),
                        bounds.upper.as_ref()
                    ],
                    |row| row.get(0),
                )?
            }
        };
        Ok(count as u64)
    }

    fn delete_index_entries_for(&self, object_store_id: ObjectStoreId, primary_key: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM IndexRecords WHERE objectStoreID = ?1 AND value = ?2")?
            .execute(params![object_store_id, primary_key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{encode_key, KeyData, KeyRange};

    fn key(v: i64) -> Bytes {
        encode_key(&KeyData::from(v))
    }

    fn setup(conn: &Connection) -> RecordStore<'_> {
        let store = RecordStore::new(conn);
        store.create_tables().unwrap();
        store
    }

    #[test]
    fn test_put_get_delete() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);

        store.put_record(1, &key(1), b"one").unwrap();
        assert!(store.record_exists(1, &key(1)).unwrap());
        assert!(!store.record_exists(2, &key(1)).unwrap());
        assert_eq!(store.get_record(1, &key(1)).unwrap(), Some(Bytes::from_static(b"one")));

        assert!(store.delete_record(1, &key(1)).unwrap());
        assert!(!store.delete_record(1, &key(1)).unwrap());
        assert_eq!(store.get_record(1, &key(1)).unwrap(), None);
    }

    #[test]
    fn test_overwrite_keeps_rowid_and_drops_index_entries() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);

        store.put_record(1, &key(1), b"old").unwrap();
        store.put_index_record(1, 1, &key(100), &key(1), false).unwrap();
        let rowid_before: i64 = conn
            .query_row("SELECT rowid FROM Records WHERE key = ?1", params![key(1).as_ref()], |r| r.get(0))
            .unwrap();

        store.put_record(1, &key(1), b"new").unwrap();
        let rowid_after: i64 = conn
            .query_row("SELECT rowid FROM Records WHERE key = ?1", params![key(1).as_ref()], |r| r.get(0))
            .unwrap();

        assert_eq!(rowid_before, rowid_after);
        assert_eq!(store.get_record(1, &key(1)).unwrap(), Some(Bytes::from_static(b"new")));
        let bounds = ScanBounds::from_range(&KeyRange::all());
        let source = ScanSource::Index {
            object_store_id: 1,
            index_id: 1,
        };
        assert_eq!(store.count(source, &bounds).unwrap(), 0);
    }

    #[test]
    fn test_unique_index_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);

        store.put_index_record(1, 1, &key(10), &key(1), true).unwrap();
        store.put_index_record(1, 1, &key(10), &key(1), true).unwrap();
        let err = store.put_index_record(1, 1, &key(10), &key(2), true).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        store.put_index_record(1, 2, &key(10), &key(2), false).unwrap();
        store.put_index_record(1, 2, &key(10), &key(3), false).unwrap();
    }

    #[test]
    fn test_range_ops() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);
        for i in 1..=6 {
            store.put_record(1, &key(i), b"v").unwrap();
        }
        store.put_index_record(1, 1, &key(50), &key(3), false).unwrap();

        let range = ScanBounds::from_range(&KeyRange::bound(2i64, 4i64, false, true));
        let (first, _) = store.first_record_in(1, &range).unwrap().unwrap();
        assert_eq!(first, key(2));
        assert_eq!(store.count(ScanSource::ObjectStore(1), &range).unwrap(), 2);

        assert_eq!(store.delete_range(1, &range).unwrap(), 2);
        let all = ScanBounds::from_range(&KeyRange::all());
        assert_eq!(store.count(ScanSource::ObjectStore(1), &all).unwrap(), 4);
        let index = ScanSource::Index {
            object_store_id: 1,
            index_id: 1,
        };
        assert_eq!(store.count(index, &all).unwrap(), 0);

        store.clear_records(1).unwrap();
        assert_eq!(store.count(ScanSource::ObjectStore(1), &all).unwrap(), 0);
    }
}
