//! Relational schema and the metadata catalog.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::RecordStore;
use crate::metadata::{DatabaseMetadata, IndexMetadata, ObjectStoreMetadata};
use crate::types::{IndexId, ObjectStoreId};
use crate::{Error, Result};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u64 = 1;

const INFO_SCHEMA_VERSION: &str = "SchemaVersion";
const INFO_DATABASE_NAME: &str = "DatabaseName";
const INFO_DATABASE_VERSION: &str = "DatabaseVersion";
const INFO_MAX_OBJECT_STORE_ID: &str = "MaxObjectStoreID";

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS DatabaseInfo (
        key   TEXT NOT NULL PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ObjectStoreInfo (
        id         INTEGER NOT NULL PRIMARY KEY,
        name       TEXT NOT NULL UNIQUE,
        keyPath    TEXT,
        autoInc    INTEGER NOT NULL,
        maxIndexID INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS IndexInfo (
        id            INTEGER NOT NULL,
        objectStoreID INTEGER NOT NULL,
        name          TEXT NOT NULL,
        keyPath       TEXT,
        isUnique      INTEGER NOT NULL,
        multiEntry    INTEGER NOT NULL,
        PRIMARY KEY (objectStoreID, id),
        UNIQUE (objectStoreID, name)
    );
    CREATE TABLE IF NOT EXISTS KeyGenerators (
        objectStoreID INTEGER NOT NULL PRIMARY KEY,
        currentKey    INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS Records (
        objectStoreID INTEGER NOT NULL,
        key           BLOB NOT NULL,
        value         BLOB NOT NULL,
        PRIMARY KEY (objectStoreID, key)
    );
    CREATE TABLE IF NOT EXISTS IndexRecords (
        indexID       INTEGER NOT NULL,
        objectStoreID INTEGER NOT NULL,
        key           BLOB NOT NULL,
        value         BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS IndexRecordsByKey
        ON IndexRecords (objectStoreID, indexID, key, value);
    CREATE INDEX IF NOT EXISTS IndexRecordsByPrimaryKey
        ON IndexRecords (objectStoreID, value);
";

impl RecordStore<'_> {
    /// Create all tables and indexes if they are missing.
    pub fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLES)?;
        Ok(())
    }

    /// Load the database metadata, or `None` if it was never established.
    pub fn load_database_metadata(&self) -> Result<Option<DatabaseMetadata>> {
        let name = match self.info(INFO_DATABASE_NAME)? {
            Some(name) => name,
            None => return Ok(None),
        };

        let schema_version = self.info_number(INFO_SCHEMA_VERSION)?;
        if schema_version > SCHEMA_VERSION {
            return Err(Error::corruption(format!(
                "schema version {} is newer than supported version {}",
                schema_version, SCHEMA_VERSION
            )));
        }

        let mut metadata = DatabaseMetadata {
            name,
            version: self.info_number(INFO_DATABASE_VERSION)?,
            max_object_store_id: self.info_number(INFO_MAX_OBJECT_STORE_ID)? as ObjectStoreId,
            object_stores: BTreeMap::new(),
        };

        let stores: Vec<ObjectStoreMetadata> = self
            .conn
            .prepare_cached("SELECT id, name, keyPath, autoInc, maxIndexID FROM ObjectStoreInfo")?
            .query_map([], store_from_row)?
            .collect::<rusqlite::Result<_>>()?;

        for mut store in stores {
            store.indexes = self.load_indexes(store.id)?;
            metadata.object_stores.insert(store.id, store);
        }

        Ok(Some(metadata))
    }

    /// Write database info for a new database.
    ///
    /// Version and max object store id already present (object stores
    /// created before the metadata was established) are kept.
    pub fn initialize_database_info(&self, name: &str) -> Result<DatabaseMetadata> {
        self.set_info(INFO_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        self.set_info(INFO_DATABASE_NAME, name)?;
        self.default_info(INFO_DATABASE_VERSION, "0")?;
        self.default_info(INFO_MAX_OBJECT_STORE_ID, "0")?;
        debug!(name, "initialized database info");

        self.load_database_metadata()?
            .ok_or_else(|| Error::internal("database info missing right after it was written"))
    }

    pub fn set_database_version(&self, version: u64) -> Result<()> {
        self.set_info(INFO_DATABASE_VERSION, &version.to_string())
    }

    /// Register a new object store and its key generator.
    ///
    /// Either every row is written or none is.
    pub fn insert_object_store(&self, store: &ObjectStoreMetadata) -> Result<()> {
        if self.object_store_exists(store.id)? {
            return Err(Error::AlreadyExists(format!("object store {}", store.id)));
        }
        let name_taken = self
            .conn
            .prepare_cached("SELECT 1 FROM ObjectStoreInfo WHERE name = ?1")?
            .query_row(params![store.name], |_| Ok(()))
            .optional()?;
        if name_taken.is_some() {
            return Err(Error::AlreadyExists(format!("object store named {:?}", store.name)));
        }

        let mut index_names: Vec<&str> = store.indexes.values().map(|i| i.name.as_str()).collect();
        index_names.sort_unstable();
        if let Some(pair) = index_names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::AlreadyExists(format!("index named {:?}", pair[0])));
        }

        let max_id = self.max_object_store_id()?;

        self.conn.execute_batch("SAVEPOINT insert_object_store")?;
        match self.write_object_store(store, max_id) {
            Ok(()) => {
                self.conn.execute_batch("RELEASE insert_object_store")?;
                Ok(())
            }
            Err(err) => {
                self.conn
                    .execute_batch("ROLLBACK TO insert_object_store; RELEASE insert_object_store")?;
                Err(err)
            }
        }
    }

    fn write_object_store(&self, store: &ObjectStoreMetadata, max_id: ObjectStoreId) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO ObjectStoreInfo (id, name, keyPath, autoInc, maxIndexID) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                store.id,
                store.name,
                store.key_path,
                store.auto_increment,
                store.max_index_id
            ])?;
        self.conn
            .prepare_cached("INSERT INTO KeyGenerators (objectStoreID, currentKey) VALUES (?1, 0)")?
            .execute(params![store.id])?;

        if store.id > max_id {
            self.set_info(INFO_MAX_OBJECT_STORE_ID, &store.id.to_string())?;
        }

        for index in store.indexes.values() {
            self.insert_index(store.id, index)?;
        }
        Ok(())
    }

    /// Remove an object store with its indexes, records, and key generator.
    pub fn remove_object_store(&self, object_store_id: ObjectStoreId) -> Result<()> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM ObjectStoreInfo WHERE id = ?1")?
            .execute(params![object_store_id])?;
        if removed == 0 {
            return Err(Error::not_found(format!("object store {}", object_store_id)));
        }

        for sql in [
            "DELETE FROM KeyGenerators WHERE objectStoreID = ?1",
            "DELETE FROM IndexInfo WHERE objectStoreID = ?1",
            "DELETE FROM Records WHERE objectStoreID = ?1",
            "DELETE FROM IndexRecords WHERE objectStoreID = ?1",
        ] {
            self.conn.prepare_cached(sql)?.execute(params![object_store_id])?;
        }
        Ok(())
    }

    pub fn object_store_exists(&self, object_store_id: ObjectStoreId) -> Result<bool> {
        let found = self
            .conn
            .prepare_cached("SELECT 1 FROM ObjectStoreInfo WHERE id = ?1")?
            .query_row(params![object_store_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Metadata of one object store, including its indexes.
    pub fn object_store(&self, object_store_id: ObjectStoreId) -> Result<Option<ObjectStoreMetadata>> {
        let store = self
            .conn
            .prepare_cached(
                "SELECT id, name, keyPath, autoInc, maxIndexID FROM ObjectStoreInfo WHERE id = ?1",
            )?
            .query_row(params![object_store_id], store_from_row)
            .optional()?;

        match store {
            Some(mut store) => {
                store.indexes = self.load_indexes(store.id)?;
                Ok(Some(store))
            }
            None => Ok(None),
        }
    }

    /// Register a new index on an existing object store.
    pub fn insert_index(&self, object_store_id: ObjectStoreId, index: &IndexMetadata) -> Result<()> {
        if self.index(object_store_id, index.id)?.is_some() {
            return Err(Error::AlreadyExists(format!(
                "index {} on object store {}",
                index.id, object_store_id
            )));
        }

        self.conn
            .prepare_cached(
                "INSERT INTO IndexInfo (id, objectStoreID, name, keyPath, isUnique, multiEntry) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                index.id,
                object_store_id,
                index.name,
                index.key_path,
                index.unique,
                index.multi_entry
            ])?;
        self.conn
            .prepare_cached(
                "UPDATE ObjectStoreInfo SET maxIndexID = MAX(maxIndexID, ?2) WHERE id = ?1",
            )?
            .execute(params![object_store_id, index.id])?;
        Ok(())
    }

    /// Remove an index and its entries.
    pub fn remove_index(&self, object_store_id: ObjectStoreId, index_id: IndexId) -> Result<()> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM IndexInfo WHERE objectStoreID = ?1 AND id = ?2")?
            .execute(params![object_store_id, index_id])?;
        if removed == 0 {
            return Err(Error::IndexNotFound {
                object_store_id,
                index_id,
            });
        }

        self.conn
            .prepare_cached("DELETE FROM IndexRecords WHERE objectStoreID = ?1 AND indexID = ?2")?
            .execute(params![object_store_id, index_id])?;
        Ok(())
    }

    /// Metadata of one index.
    pub fn index(&self, object_store_id: ObjectStoreId, index_id: IndexId) -> Result<Option<IndexMetadata>> {
        let index = self
            .conn
            .prepare_cached(
                "SELECT id, name, keyPath, isUnique, multiEntry FROM IndexInfo \
                 WHERE objectStoreID = ?1 AND id = ?2",
            )?
            .query_row(params![object_store_id, index_id], index_from_row)
            .optional()?;
        Ok(index)
    }

    fn load_indexes(&self, object_store_id: ObjectStoreId) -> Result<BTreeMap<IndexId, IndexMetadata>> {
        let indexes = self
            .conn
            .prepare_cached(
                "SELECT id, name, keyPath, isUnique, multiEntry FROM IndexInfo WHERE objectStoreID = ?1",
            )?
            .query_map(params![object_store_id], index_from_row)?
            .map(|index| index.map(|index| (index.id, index)))
            .collect::<rusqlite::Result<_>>()?;
        Ok(indexes)
    }

    fn info(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM DatabaseInfo WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Highest object store id ever created; 0 before metadata is established.
    fn max_object_store_id(&self) -> Result<ObjectStoreId> {
        if self.info(INFO_MAX_OBJECT_STORE_ID)?.is_none() {
            return Ok(0);
        }
        Ok(self.info_number(INFO_MAX_OBJECT_STORE_ID)? as ObjectStoreId)
    }

    fn info_number(&self, key: &str) -> Result<u64> {
        let raw = self
            .info(key)?
            .ok_or_else(|| Error::corruption(format!("missing database info {}", key)))?;
        raw.parse()
            .map_err(|_| Error::corruption(format!("database info {} is not a number: {:?}", key, raw)))
    }

    fn set_info(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO DatabaseInfo (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        Ok(())
    }

    fn default_info(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO DatabaseInfo (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        Ok(())
    }
}

fn store_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectStoreMetadata> {
    Ok(ObjectStoreMetadata {
        id: row.get(0)?,
        name: row.get(1)?,
        key_path: row.get(2)?,
        auto_increment: row.get(3)?,
        max_index_id: row.get(4)?,
        indexes: BTreeMap::new(),
    })
}

fn index_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexMetadata> {
    Ok(IndexMetadata {
        id: row.get(0)?,
        name: row.get(1)?,
        key_path: row.get(2)?,
        unique: row.get(3)?,
        multi_entry: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup(conn: &Connection) -> RecordStore<'_> {
        let store = RecordStore::new(conn);
        store.create_tables().unwrap();
        store
    }

    #[test]
    fn test_metadata_lifecycle() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);

        assert!(store.load_database_metadata().unwrap().is_none());
        store.initialize_database_info("library").unwrap();
        store.set_database_version(3).unwrap();

        let books = ObjectStoreMetadata::new(4, "books").key_path("isbn").auto_increment(true);
        store.insert_object_store(&books).unwrap();
        store
            .insert_index(4, &IndexMetadata::new(2, "by_title").unique(true))
            .unwrap();

        let meta = store.load_database_metadata().unwrap().unwrap();
        assert_eq!(meta.name, "library");
        assert_eq!(meta.version, 3);
        assert_eq!(meta.max_object_store_id, 4);

        let loaded = &meta.object_stores[&4];
        assert_eq!(loaded.key_path.as_deref(), Some("isbn"));
        assert!(loaded.auto_increment);
        assert_eq!(loaded.max_index_id, 2);
        assert!(loaded.indexes[&2].unique);
    }

    #[test]
    fn test_duplicate_object_store_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);
        store.initialize_database_info("db").unwrap();

        store.insert_object_store(&ObjectStoreMetadata::new(1, "a")).unwrap();
        assert!(matches!(
            store.insert_object_store(&ObjectStoreMetadata::new(1, "b")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.insert_object_store(&ObjectStoreMetadata::new(2, "a")),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_insert_object_store_before_metadata() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);

        store.insert_object_store(&ObjectStoreMetadata::new(3, "a")).unwrap();
        assert!(store.object_store_exists(3).unwrap());
        assert_eq!(store.max_object_store_id().unwrap(), 3);
    }

    #[test]
    fn test_failed_insert_object_store_writes_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);
        store.initialize_database_info("db").unwrap();

        store.set_info(INFO_MAX_OBJECT_STORE_ID, "garbage").unwrap();
        assert!(store
            .insert_object_store(&ObjectStoreMetadata::new(1, "a"))
            .unwrap_err()
            .is_corruption());
        assert!(!store.object_store_exists(1).unwrap());
        assert!(store.key_generator_value(1).is_err());
        store.set_info(INFO_MAX_OBJECT_STORE_ID, "0").unwrap();

        let mut clashing = ObjectStoreMetadata::new(1, "a");
        clashing.indexes.insert(1, IndexMetadata::new(1, "same"));
        clashing.indexes.insert(2, IndexMetadata::new(2, "same"));
        assert!(matches!(
            store.insert_object_store(&clashing),
            Err(Error::AlreadyExists(_))
        ));
        assert!(!store.object_store_exists(1).unwrap());

        store.insert_object_store(&ObjectStoreMetadata::new(1, "a")).unwrap();
    }

    #[test]
    fn test_remove_object_store_and_index() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);
        store.initialize_database_info("db").unwrap();

        store.insert_object_store(&ObjectStoreMetadata::new(1, "a")).unwrap();
        store.insert_index(1, &IndexMetadata::new(1, "i")).unwrap();

        store.remove_index(1, 1).unwrap();
        assert!(store.index(1, 1).unwrap().is_none());
        assert!(matches!(
            store.remove_index(1, 1),
            Err(Error::IndexNotFound { .. })
        ));

        store.remove_object_store(1).unwrap();
        assert!(store.object_store(1).unwrap().is_none());
        assert!(store.key_generator_value(1).is_err());
        assert!(matches!(store.remove_object_store(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let store = setup(&conn);
        store.initialize_database_info("db").unwrap();
        store.set_info(INFO_SCHEMA_VERSION, "99").unwrap();

        assert!(store.load_database_metadata().unwrap_err().is_corruption());
    }
}
