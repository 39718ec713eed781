//! Database, object store, and index metadata.

use std::collections::BTreeMap;

use crate::types::{IndexId, ObjectStoreId};

/// Metadata describing the whole database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabaseMetadata {
    /// Database name.
    pub name: String,
    /// Current schema version.
    pub version: u64,
    /// Highest object store id ever assigned.
    pub max_object_store_id: ObjectStoreId,
    /// Object stores keyed by id.
    pub object_stores: BTreeMap<ObjectStoreId, ObjectStoreMetadata>,
}

impl DatabaseMetadata {
    /// Look up an object store by name.
    pub fn object_store_by_name(&self, name: &str) -> Option<&ObjectStoreMetadata> {
        self.object_stores.values().find(|store| store.name == name)
    }
}

/// Metadata describing one object store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStoreMetadata {
    pub id: ObjectStoreId,
    pub name: String,
    /// Key path used to extract keys from values, if any.
    pub key_path: Option<String>,
    /// Whether keys are generated when none is supplied.
    pub auto_increment: bool,
    /// Highest index id ever assigned on this store.
    pub max_index_id: IndexId,
    pub indexes: BTreeMap<IndexId, IndexMetadata>,
}

impl ObjectStoreMetadata {
    /// Create metadata for a store without key path or key generator.
    pub fn new(id: ObjectStoreId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            key_path: None,
            auto_increment: false,
            max_index_id: 0,
            indexes: BTreeMap::new(),
        }
    }

    /// Set the key path.
    pub fn key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Enable or disable the key generator.
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// Metadata describing one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    pub id: IndexId,
    pub name: String,
    pub key_path: Option<String>,
    /// At most one record per index key.
    pub unique: bool,
    /// Array keys produce one entry per element.
    pub multi_entry: bool,
}

impl IndexMetadata {
    /// Create metadata for a non-unique, single-entry index.
    pub fn new(id: IndexId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            key_path: None,
            unique: false,
            multi_entry: false,
        }
    }

    /// Set the key path.
    pub fn key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Set the unique flag.
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set the multi-entry flag.
    pub fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}
