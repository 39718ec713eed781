//! Backing store - the entry point for every database operation.
//!
//! The BackingStore owns:
//! - The SQLite connection and its schema
//! - The transaction registry, keyed by caller-assigned transaction id
//! - The cursor routing table, mapping cursor ids to their transaction
//!
//! Every record or schema write goes through here so the owning
//! transaction can mark the affected cursors for rearm.
//!
//! # Threading
//!
//! A BackingStore is driven from a single thread. Callers serialize access
//! (`&mut self` on every mutating operation enforces this).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::cursor::Cursor;
use crate::key::{decode_key, encode_key, KeyData, KeyRange};
use crate::metadata::{DatabaseMetadata, IndexMetadata, ObjectStoreMetadata};
use crate::metrics::StoreMetrics;
use crate::options::Options;
use crate::record::{RecordStore, ScanBounds, ScanSource};
use crate::transaction::Transaction;
use crate::types::{
    CursorDirection, CursorId, CursorRecord, CursorType, IndexGetResult, IndexId, ObjectStoreId,
    TransactionId, TransactionMode,
};
use crate::{Error, Result};

/// Largest value a key generator produces (2^53).
pub const MAX_GENERATED_KEY: i64 = 1 << 53;

/// Id given to the short-lived cursors behind single-record index lookups.
const LOOKUP_CURSOR_ID: CursorId = 0;

/// A database on top of one SQLite connection.
pub struct BackingStore {
    conn: Connection,
    options: Options,
    name: String,
    /// File path, `None` for in-memory stores.
    path: Option<PathBuf>,
    transactions: HashMap<TransactionId, Transaction>,
    cursor_routes: HashMap<CursorId, TransactionId>,
    next_cursor_id: CursorId,
    /// Transaction currently holding the SQLite transaction.
    in_progress: Option<TransactionId>,
    metrics: Arc<StoreMetrics>,
}

impl BackingStore {
    /// Open a database file.
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        Self::open_with_options(path, name, Options::default())
    }

    /// Open a database file with custom options.
    ///
    /// If the file doesn't exist and `create_if_missing` is true, a new
    /// database is created, along with any missing parent directories.
    pub fn open_with_options(path: impl AsRef<Path>, name: &str, options: Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if !options.create_if_missing {
                return Err(Error::NotFound(format!(
                    "Database file does not exist: {}",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let journal_mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            options.journal_mode.pragma_value(),
            |row| row.get(0),
        )?;
        debug!(journal_mode = %journal_mode, "configured journal mode");
        Self::initialize(conn, name, options, Some(path))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(name: &str) -> Result<Self> {
        Self::open_in_memory_with_options(name, Options::default())
    }

    /// Open a private in-memory database with custom options.
    pub fn open_in_memory_with_options(name: &str, options: Options) -> Result<Self> {
        options.validate()?;
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, name, options, None)
    }

    fn initialize(conn: Connection, name: &str, options: Options, path: Option<PathBuf>) -> Result<Self> {
        conn.set_prepared_statement_cache_capacity(options.statement_cache_capacity);
        conn.busy_timeout(options.busy_timeout)?;
        conn.pragma_update(None, "synchronous", options.sync_mode.pragma_value())?;
        RecordStore::new(&conn).create_tables()?;

        info!(name, path = ?path, "opened backing store");

        Ok(Self {
            conn,
            options,
            name: name.to_owned(),
            path,
            transactions: HashMap::new(),
            cursor_routes: HashMap::new(),
            next_cursor_id: LOOKUP_CURSOR_ID + 1,
            in_progress: None,
            metrics: Arc::new(StoreMetrics::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Metrics shared by this store and its cursors.
    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Load the database metadata, creating it on first use.
    pub fn get_or_establish_metadata(&mut self) -> Result<DatabaseMetadata> {
        let store = RecordStore::new(&self.conn);
        match store.load_database_metadata()? {
            Some(metadata) => Ok(metadata),
            None => store.initialize_database_info(&self.name),
        }
    }

    // === Transactions ===

    /// Register a transaction. It must be begun before use.
    pub fn establish_transaction(
        &mut self,
        transaction_id: TransactionId,
        object_store_ids: Vec<ObjectStoreId>,
        mode: TransactionMode,
    ) -> Result<()> {
        if self.transactions.contains_key(&transaction_id) {
            return Err(Error::AlreadyExists(format!("transaction {}", transaction_id)));
        }

        let txn = Transaction::new(transaction_id, object_store_ids, mode, Arc::clone(&self.metrics));
        self.transactions.insert(transaction_id, txn);
        debug!(transaction_id, ?mode, "established transaction");
        Ok(())
    }

    /// Begin a registered transaction. Only one may be in progress.
    pub fn begin_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
        if let Some(active) = self.in_progress {
            if active != transaction_id {
                return Err(Error::TransactionInProgress(active));
            }
        }

        lookup_mut(&mut self.transactions, transaction_id)?.begin(&self.conn)?;
        self.in_progress = Some(transaction_id);
        Ok(())
    }

    /// Commit and forget a transaction.
    pub fn commit_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
        let result = lookup_mut(&mut self.transactions, transaction_id)?.commit(&self.conn);
        self.forget_cursors_of(transaction_id);
        result?;

        self.transactions.remove(&transaction_id);
        self.release(transaction_id);
        Ok(())
    }

    /// Roll back and forget a transaction.
    pub fn rollback_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
        let result = lookup_mut(&mut self.transactions, transaction_id)?.rollback(&self.conn);
        self.forget_cursors_of(transaction_id);
        result?;

        self.transactions.remove(&transaction_id);
        self.release(transaction_id);
        Ok(())
    }

    /// Roll back a transaction's work and keep it registered, ready to begin again.
    pub fn reset_transaction(&mut self, transaction_id: TransactionId) -> Result<()> {
        let result = lookup_mut(&mut self.transactions, transaction_id)?.reset(&self.conn);
        self.forget_cursors_of(transaction_id);
        result?;

        self.release(transaction_id);
        Ok(())
    }

    /// Inspect a registered transaction.
    pub fn transaction(&self, transaction_id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&transaction_id)
    }

    fn release(&mut self, transaction_id: TransactionId) {
        if self.in_progress == Some(transaction_id) {
            self.in_progress = None;
        }
    }

    fn forget_cursors_of(&mut self, transaction_id: TransactionId) {
        self.cursor_routes.retain(|_, owner| *owner != transaction_id);
    }

    // === Schema ===

    pub fn change_database_version(&mut self, transaction_id: TransactionId, version: u64) -> Result<()> {
        lookup(&self.transactions, transaction_id)?.check_version_change()?;
        RecordStore::new(&self.conn).set_database_version(version)?;
        info!(name = %self.name, version, "changed database version");
        Ok(())
    }

    pub fn create_object_store(
        &mut self,
        transaction_id: TransactionId,
        metadata: &ObjectStoreMetadata,
    ) -> Result<()> {
        lookup(&self.transactions, transaction_id)?.check_version_change()?;
        RecordStore::new(&self.conn).insert_object_store(metadata)?;
        debug!(object_store_id = metadata.id, name = %metadata.name, "created object store");
        Ok(())
    }

    pub fn delete_object_store(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_version_change()?;

        RecordStore::new(&self.conn).remove_object_store(object_store_id)?;
        txn.notify_cursors_of_changes(object_store_id);
        debug!(object_store_id, "deleted object store");
        Ok(())
    }

    /// Delete every record in an object store.
    pub fn clear_object_store(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_writable()?;
        txn.check_scope(object_store_id)?;

        let store = RecordStore::new(&self.conn);
        require_object_store(&store, object_store_id)?;
        store.clear_records(object_store_id)?;
        txn.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    pub fn create_index(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        metadata: &IndexMetadata,
    ) -> Result<()> {
        lookup(&self.transactions, transaction_id)?.check_version_change()?;

        let store = RecordStore::new(&self.conn);
        require_object_store(&store, object_store_id)?;
        store.insert_index(object_store_id, metadata)?;
        debug!(object_store_id, index_id = metadata.id, name = %metadata.name, "created index");
        Ok(())
    }

    pub fn delete_index(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        index_id: IndexId,
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_version_change()?;

        RecordStore::new(&self.conn).remove_index(object_store_id, index_id)?;
        txn.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    // === Key generators ===

    /// Produce the next generated key for an object store.
    pub fn generate_key_number(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
    ) -> Result<i64> {
        check_write_access(&self.transactions, transaction_id, object_store_id)?;

        let store = RecordStore::new(&self.conn);
        let current = store.key_generator_value(object_store_id)?;
        if current >= MAX_GENERATED_KEY {
            return Err(Error::KeyGeneratorExhausted(object_store_id));
        }

        let next = current + 1;
        store.set_key_generator_value(object_store_id, next)?;
        Ok(next)
    }

    /// Move a key generator to `key_number`.
    ///
    /// With `check_current` the generator only ever moves forward.
    pub fn update_key_generator_number(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        key_number: i64,
        check_current: bool,
    ) -> Result<()> {
        check_write_access(&self.transactions, transaction_id, object_store_id)?;

        let store = RecordStore::new(&self.conn);
        if check_current && key_number <= store.key_generator_value(object_store_id)? {
            return Ok(());
        }
        if key_number > MAX_GENERATED_KEY {
            warn!(object_store_id, key_number, "key generator capped at its maximum");
        }
        store.set_key_generator_value(object_store_id, key_number.min(MAX_GENERATED_KEY))
    }

    // === Records ===

    pub fn key_exists_in_object_store(
        &self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        key: &KeyData,
    ) -> Result<bool> {
        check_read_access(&self.transactions, transaction_id, object_store_id)?;
        key.validate()?;
        RecordStore::new(&self.conn).record_exists(object_store_id, &encode_key(key))
    }

    /// Insert or overwrite a record.
    ///
    /// Index entries pointing at the previous value are dropped; callers
    /// add the new ones with [`put_index_record`](Self::put_index_record).
    pub fn put_record(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        key: &KeyData,
        value: &[u8],
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_writable()?;
        txn.check_scope(object_store_id)?;

        key.validate()?;
        let encoded = encode_key(key);
        check_sizes(&self.options, &encoded, value)?;

        let store = RecordStore::new(&self.conn);
        require_object_store(&store, object_store_id)?;
        store.put_record(object_store_id, &encoded, value)?;

        self.metrics.records_written.inc();
        txn.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    /// Add an index entry for a record.
    pub fn put_index_record(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        index_id: IndexId,
        key: &KeyData,
        primary_key: &KeyData,
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_writable()?;
        txn.check_scope(object_store_id)?;

        key.validate()?;
        primary_key.validate()?;
        let encoded_key = encode_key(key);
        let encoded_primary = encode_key(primary_key);
        check_sizes(&self.options, &encoded_key, &[])?;
        check_sizes(&self.options, &encoded_primary, &[])?;

        let store = RecordStore::new(&self.conn);
        let index = require_index(&store, object_store_id, index_id)?;
        store.put_index_record(
            object_store_id,
            index_id,
            &encoded_key,
            &encoded_primary,
            index.unique,
        )?;

        txn.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    /// Value stored under `key`.
    pub fn get_record(
        &self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        key: &KeyData,
    ) -> Result<Option<Bytes>> {
        check_read_access(&self.transactions, transaction_id, object_store_id)?;
        key.validate()?;
        RecordStore::new(&self.conn).get_record(object_store_id, &encode_key(key))
    }

    /// First record (lowest key) inside `range`.
    pub fn get_key_range_record(
        &self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        range: &KeyRange,
    ) -> Result<Option<(KeyData, Bytes)>> {
        check_read_access(&self.transactions, transaction_id, object_store_id)?;
        range.validate()?;

        let found = RecordStore::new(&self.conn)
            .first_record_in(object_store_id, &ScanBounds::from_range(range))?;
        match found {
            Some((key, value)) => Ok(Some((decode_key(&key)?, value))),
            None => Ok(None),
        }
    }

    /// First index entry inside `range`, with its record value for
    /// `CursorType::KeyAndValue`.
    pub fn get_index_record(
        &self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        index_id: IndexId,
        cursor_type: CursorType,
        range: &KeyRange,
    ) -> Result<Option<IndexGetResult>> {
        check_read_access(&self.transactions, transaction_id, object_store_id)?;
        require_index(&RecordStore::new(&self.conn), object_store_id, index_id)?;

        let cursor = Cursor::try_create(
            &self.conn,
            LOOKUP_CURSOR_ID,
            ScanSource::Index {
                object_store_id,
                index_id,
            },
            CursorDirection::Next,
            range.clone(),
            1,
            Arc::clone(&self.metrics),
        )?;

        let record = cursor.record();
        match (record.key, record.primary_key) {
            (Some(key), Some(primary_key)) => Ok(Some(IndexGetResult {
                key,
                primary_key,
                value: match cursor_type {
                    CursorType::KeyAndValue => Some(record.value),
                    CursorType::KeyOnly => None,
                },
            })),
            _ => Ok(None),
        }
    }

    /// Delete one record and its index entries.
    pub fn delete_record(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        key: &KeyData,
    ) -> Result<()> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_writable()?;
        txn.check_scope(object_store_id)?;
        key.validate()?;

        if RecordStore::new(&self.conn).delete_record(object_store_id, &encode_key(key))? {
            self.metrics.records_deleted.inc();
        }
        txn.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    /// Delete every record inside `range`. Returns how many were removed.
    pub fn delete_range(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        range: &KeyRange,
    ) -> Result<usize> {
        let txn = lookup_mut(&mut self.transactions, transaction_id)?;
        txn.check_writable()?;
        txn.check_scope(object_store_id)?;
        range.validate()?;

        let deleted = RecordStore::new(&self.conn)
            .delete_range(object_store_id, &ScanBounds::from_range(range))?;
        self.metrics.records_deleted.add(deleted as u64);
        txn.notify_cursors_of_changes(object_store_id);
        Ok(deleted)
    }

    /// Count records, or index entries when `index_id` is given, inside `range`.
    pub fn count(
        &self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        index_id: Option<IndexId>,
        range: &KeyRange,
    ) -> Result<u64> {
        check_read_access(&self.transactions, transaction_id, object_store_id)?;
        range.validate()?;

        let store = RecordStore::new(&self.conn);
        let source = match index_id {
            Some(index_id) => {
                require_index(&store, object_store_id, index_id)?;
                ScanSource::Index {
                    object_store_id,
                    index_id,
                }
            }
            None => {
                require_object_store(&store, object_store_id)?;
                ScanSource::ObjectStore(object_store_id)
            }
        };
        store.count(source, &ScanBounds::from_range(range))
    }

    // === Cursors ===

    /// Create a cursor inside a transaction and return its id and first position.
    pub fn open_cursor(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
        index_id: Option<IndexId>,
        direction: CursorDirection,
        range: KeyRange,
    ) -> Result<(CursorId, CursorRecord)> {
        let store = RecordStore::new(&self.conn);
        let source = match index_id {
            Some(index_id) => {
                require_index(&store, object_store_id, index_id)?;
                ScanSource::Index {
                    object_store_id,
                    index_id,
                }
            }
            None => {
                require_object_store(&store, object_store_id)?;
                ScanSource::ObjectStore(object_store_id)
            }
        };

        let cursor_id = self.next_cursor_id;
        let record = lookup_mut(&mut self.transactions, transaction_id)?.open_cursor(
            &self.conn,
            cursor_id,
            source,
            direction,
            range,
            self.options.cursor_page_size,
        )?;

        self.next_cursor_id += 1;
        self.cursor_routes.insert(cursor_id, transaction_id);
        debug!(cursor_id, transaction_id, "registered cursor");
        Ok((cursor_id, record))
    }

    /// Advance a cursor `count` steps.
    pub fn advance_cursor(&mut self, cursor_id: CursorId, count: u32) -> Result<CursorRecord> {
        let transaction_id = self.route(cursor_id)?;
        lookup_mut(&mut self.transactions, transaction_id)?.advance_cursor(&self.conn, cursor_id, count)
    }

    /// Step a cursor once, then on until it reaches `target`.
    pub fn iterate_cursor(
        &mut self,
        cursor_id: CursorId,
        target: Option<&KeyData>,
    ) -> Result<CursorRecord> {
        if let Some(target) = target {
            target.validate()?;
        }
        let transaction_id = self.route(cursor_id)?;
        lookup_mut(&mut self.transactions, transaction_id)?.iterate_cursor(&self.conn, cursor_id, target)
    }

    /// Current position of a cursor.
    pub fn cursor_record(&self, cursor_id: CursorId) -> Result<CursorRecord> {
        let transaction_id = self.route(cursor_id)?;
        lookup(&self.transactions, transaction_id)?
            .cursor(cursor_id)
            .map(Cursor::record)
            .ok_or(Error::UnknownCursor(cursor_id))
    }

    /// Destroy a cursor.
    pub fn unregister_cursor(&mut self, cursor_id: CursorId) -> Result<()> {
        let transaction_id = self
            .cursor_routes
            .remove(&cursor_id)
            .ok_or(Error::UnknownCursor(cursor_id))?;

        let closed = self
            .transactions
            .get_mut(&transaction_id)
            .map_or(false, |txn| txn.close_cursor(cursor_id));
        if !closed {
            warn!(cursor_id, transaction_id, "routed cursor was already gone");
        }
        debug!(cursor_id, "unregistered cursor");
        Ok(())
    }

    /// Mark every cursor of a transaction over `object_store_id` for rearm.
    ///
    /// Writes made through this store already do this; it is exposed for
    /// writers that bypass it.
    pub fn notify_cursors_of_changes(
        &mut self,
        transaction_id: TransactionId,
        object_store_id: ObjectStoreId,
    ) -> Result<()> {
        lookup_mut(&mut self.transactions, transaction_id)?.notify_cursors_of_changes(object_store_id);
        Ok(())
    }

    fn route(&self, cursor_id: CursorId) -> Result<TransactionId> {
        self.cursor_routes
            .get(&cursor_id)
            .copied()
            .ok_or(Error::UnknownCursor(cursor_id))
    }
}

fn lookup(
    transactions: &HashMap<TransactionId, Transaction>,
    transaction_id: TransactionId,
) -> Result<&Transaction> {
    transactions
        .get(&transaction_id)
        .ok_or(Error::UnknownTransaction(transaction_id))
}

fn lookup_mut(
    transactions: &mut HashMap<TransactionId, Transaction>,
    transaction_id: TransactionId,
) -> Result<&mut Transaction> {
    transactions
        .get_mut(&transaction_id)
        .ok_or(Error::UnknownTransaction(transaction_id))
}

fn check_read_access(
    transactions: &HashMap<TransactionId, Transaction>,
    transaction_id: TransactionId,
    object_store_id: ObjectStoreId,
) -> Result<()> {
    let txn = lookup(transactions, transaction_id)?;
    txn.check_active()?;
    txn.check_scope(object_store_id)
}

fn check_write_access(
    transactions: &HashMap<TransactionId, Transaction>,
    transaction_id: TransactionId,
    object_store_id: ObjectStoreId,
) -> Result<()> {
    let txn = lookup(transactions, transaction_id)?;
    txn.check_writable()?;
    txn.check_scope(object_store_id)
}

fn require_object_store(store: &RecordStore<'_>, object_store_id: ObjectStoreId) -> Result<()> {
    if store.object_store_exists(object_store_id)? {
        Ok(())
    } else {
        Err(Error::not_found(format!("object store {}", object_store_id)))
    }
}

fn require_index(
    store: &RecordStore<'_>,
    object_store_id: ObjectStoreId,
    index_id: IndexId,
) -> Result<IndexMetadata> {
    store
        .index(object_store_id, index_id)?
        .ok_or(Error::IndexNotFound {
            object_store_id,
            index_id,
        })
}

fn check_sizes(options: &Options, key: &[u8], value: &[u8]) -> Result<()> {
    if key.len() > options.max_key_size {
        return Err(Error::KeyTooLarge {
            size: key.len(),
            max: options.max_key_size,
        });
    }
    if value.len() > options.max_value_size {
        return Err(Error::ValueTooLarge {
            size: value.len(),
            max: options.max_value_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXN: TransactionId = 1;
    const STORE: ObjectStoreId = 1;

    fn setup() -> BackingStore {
        let mut db = BackingStore::open_in_memory("test").unwrap();
        db.get_or_establish_metadata().unwrap();
        db.establish_transaction(TXN, vec![], TransactionMode::VersionChange)
            .unwrap();
        db.begin_transaction(TXN).unwrap();
        db.create_object_store(TXN, &ObjectStoreMetadata::new(STORE, "items"))
            .unwrap();
        db
    }

    #[test]
    fn test_metadata_established_once() {
        let mut db = BackingStore::open_in_memory("library").unwrap();
        let first = db.get_or_establish_metadata().unwrap();
        assert_eq!(first.name, "library");
        assert_eq!(first.version, 0);

        db.establish_transaction(1, vec![], TransactionMode::VersionChange)
            .unwrap();
        db.begin_transaction(1).unwrap();
        db.change_database_version(1, 2).unwrap();
        db.create_object_store(1, &ObjectStoreMetadata::new(5, "books"))
            .unwrap();
        db.commit_transaction(1).unwrap();

        let second = db.get_or_establish_metadata().unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.object_store_by_name("books").map(|s| s.id), Some(5));
    }

    #[test]
    fn test_only_one_transaction_in_progress() {
        let mut db = setup();
        db.establish_transaction(2, vec![STORE], TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(db.begin_transaction(2), Err(Error::TransactionInProgress(TXN)));

        db.commit_transaction(TXN).unwrap();
        db.begin_transaction(2).unwrap();
        assert!(db.transaction(TXN).is_none());
        assert!(matches!(
            db.establish_transaction(2, vec![], TransactionMode::ReadOnly),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_key_generator() {
        let mut db = setup();
        assert_eq!(db.generate_key_number(TXN, STORE).unwrap(), 1);
        assert_eq!(db.generate_key_number(TXN, STORE).unwrap(), 2);

        db.update_key_generator_number(TXN, STORE, 10, true).unwrap();
        db.update_key_generator_number(TXN, STORE, 5, true).unwrap();
        assert_eq!(db.generate_key_number(TXN, STORE).unwrap(), 11);

        db.update_key_generator_number(TXN, STORE, MAX_GENERATED_KEY, false)
            .unwrap();
        assert_eq!(
            db.generate_key_number(TXN, STORE),
            Err(Error::KeyGeneratorExhausted(STORE))
        );
    }

    #[test]
    fn test_size_limits() {
        let options = Options {
            max_key_size: 16,
            max_value_size: 4,
            ..Options::default()
        };
        let mut db = BackingStore::open_in_memory_with_options("limits", options).unwrap();
        db.establish_transaction(TXN, vec![], TransactionMode::VersionChange)
            .unwrap();
        db.begin_transaction(TXN).unwrap();
        db.create_object_store(TXN, &ObjectStoreMetadata::new(STORE, "items"))
            .unwrap();

        let long_key = KeyData::from("this key is far too long");
        assert!(matches!(
            db.put_record(TXN, STORE, &long_key, b"v"),
            Err(Error::KeyTooLarge { .. })
        ));
        assert!(matches!(
            db.put_record(TXN, STORE, &KeyData::from(1i64), b"toolong"),
            Err(Error::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_create_object_store_without_metadata() {
        let mut db = BackingStore::open_in_memory("fresh").unwrap();
        db.establish_transaction(TXN, vec![], TransactionMode::VersionChange)
            .unwrap();
        db.begin_transaction(TXN).unwrap();

        db.create_object_store(TXN, &ObjectStoreMetadata::new(STORE, "items"))
            .unwrap();
        db.put_record(TXN, STORE, &KeyData::from(1i64), b"v").unwrap();
        assert!(matches!(
            db.create_object_store(TXN, &ObjectStoreMetadata::new(STORE, "other")),
            Err(Error::AlreadyExists(_))
        ));
        db.commit_transaction(TXN).unwrap();

        let metadata = db.get_or_establish_metadata().unwrap();
        assert_eq!(metadata.name, "fresh");
        assert_eq!(metadata.max_object_store_id, STORE);
        assert!(metadata.object_stores.contains_key(&STORE));
    }

    #[test]
    fn test_put_requires_existing_store() {
        let mut db = setup();
        assert!(matches!(
            db.put_record(TXN, 99, &KeyData::from(1i64), b"v"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            db.open_cursor(TXN, STORE, Some(3), CursorDirection::Next, KeyRange::all()),
            Err(Error::IndexNotFound { .. })
        ));
    }

    #[test]
    fn test_get_index_record() {
        let mut db = setup();
        db.create_index(TXN, STORE, &IndexMetadata::new(1, "by_name"))
            .unwrap();
        db.put_record(TXN, STORE, &KeyData::from(1i64), b"alice").unwrap();
        db.put_index_record(TXN, STORE, 1, &KeyData::from("alice"), &KeyData::from(1i64))
            .unwrap();

        let hit = db
            .get_index_record(TXN, STORE, 1, CursorType::KeyAndValue, &KeyRange::only("alice"))
            .unwrap()
            .unwrap();
        assert_eq!(hit.primary_key, KeyData::from(1i64));
        assert_eq!(hit.value, Some(Bytes::from_static(b"alice")));

        let key_only = db
            .get_index_record(TXN, STORE, 1, CursorType::KeyOnly, &KeyRange::all())
            .unwrap()
            .unwrap();
        assert_eq!(key_only.value, None);

        assert!(db
            .get_index_record(TXN, STORE, 1, CursorType::KeyOnly, &KeyRange::only("bob"))
            .unwrap()
            .is_none());
        assert_eq!(db.metrics().open_cursors.get(), 0);
        // Lookups are not cursors the caller opened.
        assert_eq!(db.metrics().cursors_opened.get(), 0);
    }
}
