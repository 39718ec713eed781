//! Ordered, paged range queries over the record tables.
//!
//! A [`RangeQuery`] plays the role of a long-lived SQLite statement: rows
//! are pulled lazily one page at a time, each page continuing strictly after
//! the last row fetched (keyset paging). Rebinding discards buffered rows and
//! restarts the scan from new bounds.

use std::collections::VecDeque;

use bytes::Bytes;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::key::{encode_key, KeyData, KeyRange};
use crate::types::{CursorDirection, IndexId, ObjectStoreId};
use crate::Result;

/// The table a range query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSource {
    /// Primary records of an object store.
    ObjectStore(ObjectStoreId),
    /// Entries of one index on an object store.
    Index {
        object_store_id: ObjectStoreId,
        index_id: IndexId,
    },
}

impl ScanSource {
    /// Object store the scanned rows belong to.
    pub fn object_store_id(&self) -> ObjectStoreId {
        match *self {
            ScanSource::ObjectStore(id) => id,
            ScanSource::Index {
                object_store_id, ..
            } => object_store_id,
        }
    }

    /// Index being scanned, if any.
    pub fn index_id(&self) -> Option<IndexId> {
        match *self {
            ScanSource::ObjectStore(_) => None,
            ScanSource::Index { index_id, .. } => Some(index_id),
        }
    }
}

/// A row as stored: row identifier, encoded key, and value column.
///
/// For index rows the value column holds the encoded primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub row_id: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Encoded key bounds of a scan. Both edges are always present; unbounded
/// edges use the encoded sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBounds {
    pub lower: Bytes,
    pub lower_inclusive: bool,
    pub upper: Bytes,
    pub upper_inclusive: bool,
}

impl ScanBounds {
    /// Bounds between two keys.
    pub fn new(
        lower: &KeyData,
        lower_inclusive: bool,
        upper: &KeyData,
        upper_inclusive: bool,
    ) -> Self {
        Self {
            lower: encode_key(lower),
            lower_inclusive,
            upper: encode_key(upper),
            upper_inclusive,
        }
    }

    /// Bounds equivalent to a key range.
    pub fn from_range(range: &KeyRange) -> Self {
        Self::new(
            &range.effective_lower(),
            !range.lower_open,
            &range.effective_upper(),
            !range.upper_open,
        )
    }

    fn lower_op(&self) -> &'static str {
        if self.lower_inclusive {
            ">="
        } else {
            ">"
        }
    }

    fn upper_op(&self) -> &'static str {
        if self.upper_inclusive {
            "<="
        } else {
            "<"
        }
    }

    /// `WHERE` fragment constraining `key`, using the given parameter numbers.
    pub(crate) fn predicate(&self, lower_param: usize, upper_param: usize) -> String {
        format!(
            "key {} ?{} AND key {} ?{}",
            self.lower_op(),
            lower_param,
            self.upper_op(),
            upper_param
        )
    }
}

/// A lazily evaluated range scan over one table.
#[derive(Debug)]
pub struct RangeQuery {
    source: ScanSource,
    direction: CursorDirection,
    bounds: ScanBounds,
    page_size: usize,
    first_page_sql: String,
    next_page_sql: String,
    buffer: VecDeque<RawRow>,
    last_fetched: Option<RawRow>,
    exhausted: bool,
}

impl RangeQuery {
    /// Build the query and prepare its statements.
    ///
    /// Preparing up front means an unusable query fails here rather than on
    /// the first step.
    pub fn new(
        conn: &Connection,
        source: ScanSource,
        direction: CursorDirection,
        bounds: ScanBounds,
        page_size: usize,
    ) -> Result<Self> {
        let mut query = Self {
            source,
            direction,
            bounds,
            page_size: page_size.max(1),
            first_page_sql: String::new(),
            next_page_sql: String::new(),
            buffer: VecDeque::new(),
            last_fetched: None,
            exhausted: false,
        };
        query.build(conn)?;
        Ok(query)
    }

    /// SQL text of the first page query.
    pub fn sql(&self) -> &str {
        &self.first_page_sql
    }

    /// Restart the scan with new bounds.
    pub fn rebind(&mut self, conn: &Connection, bounds: ScanBounds) -> Result<()> {
        self.bounds = bounds;
        self.build(conn)
    }

    /// Restart the scan with new bounds, continuing strictly after `position`
    /// in scan order.
    ///
    /// Meant for index scans: their rows are ordered by key, primary key,
    /// then row id, so the position pins one row exactly. On an object store
    /// it would also skip a new row now holding the position's key.
    pub fn rebind_after(&mut self, conn: &Connection, bounds: ScanBounds, position: RawRow) -> Result<()> {
        self.rebind(conn, bounds)?;
        self.last_fetched = Some(position);
        Ok(())
    }

    /// Return the next row, or `None` once the range is exhausted.
    pub fn step(&mut self, conn: &Connection) -> Result<Option<RawRow>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page(conn)?;
        }
        Ok(self.buffer.pop_front())
    }

    fn build(&mut self, conn: &Connection) -> Result<()> {
        self.first_page_sql = self.build_sql(false);
        self.next_page_sql = self.build_sql(true);
        self.buffer.clear();
        self.last_fetched = None;
        self.exhausted = false;

        conn.prepare_cached(&self.first_page_sql)?;
        conn.prepare_cached(&self.next_page_sql)?;
        Ok(())
    }

    fn build_sql(&self, continuation: bool) -> String {
        let (key_order, key_cmp) = if self.direction.is_next_family() {
            ("ASC", ">")
        } else {
            ("DESC", "<")
        };

        match self.source {
            ScanSource::ObjectStore(_) => {
                let mut sql = format!(
                    "SELECT rowid, key, value FROM Records WHERE objectStoreID = ?1 AND {}",
                    self.bounds.predicate(2, 3)
                );
                let limit_param = if continuation {
                    sql.push_str(&format!(" AND key {} ?4", key_cmp));
                    5
                } else {
                    4
                };
                sql.push_str(&format!(
                    " ORDER BY key {} LIMIT ?{}",
                    key_order, limit_param
                ));
                sql
            }
            ScanSource::Index { .. } => {
                // Only plain Prev walks duplicates backwards; PrevNoDuplicate
                // must land on the lowest primary key of each index key.
                let (value_order, value_cmp) = if self.direction == CursorDirection::Prev {
                    ("DESC", "<")
                } else {
                    ("ASC", ">")
                };

                let mut sql = format!(
                    "SELECT rowid, key, value FROM IndexRecords \
                     WHERE objectStoreID = ?1 AND indexID = ?2 AND {}",
                    self.bounds.predicate(3, 4)
                );
                let limit_param = if continuation {
                    sql.push_str(&format!(
                        " AND (key {kc} ?5 OR (key = ?5 AND (value {vc} ?6 \
                         OR (value = ?6 AND rowid {vc} ?7))))",
                        kc = key_cmp,
                        vc = value_cmp
                    ));
                    8
                } else {
                    5
                };
                sql.push_str(&format!(
                    " ORDER BY key {ko}, value {vo}, rowid {vo} LIMIT ?{n}",
                    ko = key_order,
                    vo = value_order,
                    n = limit_param
                ));
                sql
            }
        }
    }

    fn page_params(&self) -> Vec<Value> {
        let mut params = vec![Value::Integer(self.source.object_store_id())];
        if let Some(index_id) = self.source.index_id() {
            params.push(Value::Integer(index_id));
        }
        params.push(Value::Blob(self.bounds.lower.to_vec()));
        params.push(Value::Blob(self.bounds.upper.to_vec()));

        if let Some(last) = &self.last_fetched {
            params.push(Value::Blob(last.key.clone()));
            if self.source.index_id().is_some() {
                params.push(Value::Blob(last.value.clone()));
                params.push(Value::Integer(last.row_id));
            }
        }

        params.push(Value::Integer(self.page_size as i64));
        params
    }

    fn fetch_page(&mut self, conn: &Connection) -> Result<()> {
        let params = self.page_params();
        let sql = if self.last_fetched.is_some() {
            &self.next_page_sql
        } else {
            &self.first_page_sql
        };

        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok(RawRow {
                row_id: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
            })
        })?;

        let mut fetched = 0;
        for row in rows {
            self.buffer.push_back(row?);
            fetched += 1;
        }

        if fetched < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = self.buffer.back() {
            self.last_fetched = Some(last.clone());
        }
        Ok(())
    }
}
