//! Cursor - directional, range-bounded iteration that tolerates writes.
//!
//! A cursor owns one [`RangeQuery`] and walks it row by row. When the
//! owning transaction reports a write to the scanned object store the
//! cursor is marked for rearm: before its next step it narrows its bounds
//! to start at the key it last reported (inclusive) and restarts the query.
//! The row it already reported may come back after the restart and is
//! recognised by its row identifier, so a new row that now holds that same
//! key is still seen.
//!
//! Index keys repeat, so an index cursor instead resumes strictly after the
//! entry it last reported (key, primary key, row id). Entries already
//! reported under the current key stay behind it.

use std::sync::Arc;

use bytes::Bytes;
use rusqlite::Connection;
use tracing::{debug, error, trace};

use crate::key::{decode_key, KeyData, KeyRange};
use crate::metrics::StoreMetrics;
use crate::record::{RangeQuery, RawRow, RecordStore, ScanBounds, ScanSource};
use crate::types::{CursorDirection, CursorId, CursorRecord, IndexId, ObjectStoreId};
use crate::{Error, Result};

/// Cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Positioned on a row and able to move.
    Active,
    /// Ran past the end of its range.
    Completed,
    /// A step or decode failed. Terminal.
    Errored,
}

/// Outcome of a single raw step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// The cursor moved, or completed.
    Advanced,
    /// The row was skipped; step again.
    ShouldAdvanceAgain,
}

/// A cursor over an object store or one of its indexes.
#[derive(Debug)]
pub struct Cursor {
    id: CursorId,
    source: ScanSource,
    direction: CursorDirection,
    key_range: KeyRange,

    current_lower: KeyData,
    lower_inclusive: bool,
    current_upper: KeyData,
    upper_inclusive: bool,

    current_key: Option<KeyData>,
    current_primary_key: Option<KeyData>,
    current_value: Bytes,
    /// Row identifier of the row most recently reported.
    last_row_id: Option<i64>,
    /// Index row most recently reported, the resume point for a rearm.
    last_index_row: Option<RawRow>,

    needs_rearm: bool,
    state: CursorState,
    query: RangeQuery,
    metrics: Arc<StoreMetrics>,
}

impl Cursor {
    /// Build a cursor and position it on the first row of its range.
    ///
    /// Fails without returning a cursor if the range is invalid, the query
    /// cannot be prepared, or the first step fails.
    pub(crate) fn try_create(
        conn: &Connection,
        id: CursorId,
        source: ScanSource,
        direction: CursorDirection,
        key_range: KeyRange,
        page_size: usize,
        metrics: Arc<StoreMetrics>,
    ) -> Result<Self> {
        key_range.validate()?;

        let current_lower = key_range.effective_lower();
        let current_upper = key_range.effective_upper();
        let lower_inclusive = !key_range.lower_open;
        let upper_inclusive = !key_range.upper_open;

        let bounds = ScanBounds::new(&current_lower, lower_inclusive, &current_upper, upper_inclusive);
        let query = RangeQuery::new(conn, source, direction, bounds, page_size)?;
        debug!(cursor_id = id, ?source, ?direction, sql = query.sql(), "establishing cursor");

        let mut cursor = Self {
            id,
            source,
            direction,
            key_range,
            current_lower,
            lower_inclusive,
            current_upper,
            upper_inclusive,
            current_key: None,
            current_primary_key: None,
            current_value: Bytes::new(),
            last_row_id: None,
            last_index_row: None,
            needs_rearm: false,
            state: CursorState::Active,
            query,
            metrics,
        };

        cursor.advance(conn, 1)?;
        Ok(cursor)
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn object_store_id(&self) -> ObjectStoreId {
        self.source.object_store_id()
    }

    pub fn index_id(&self) -> Option<IndexId> {
        self.source.index_id()
    }

    pub fn direction(&self) -> CursorDirection {
        self.direction
    }

    /// The range the cursor was created with.
    pub fn key_range(&self) -> &KeyRange {
        &self.key_range
    }

    /// Current key, `None` once the range is exhausted.
    pub fn key(&self) -> Option<&KeyData> {
        self.current_key.as_ref()
    }

    pub fn primary_key(&self) -> Option<&KeyData> {
        self.current_primary_key.as_ref()
    }

    pub fn value(&self) -> &Bytes {
        &self.current_value
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// True once the cursor can no longer move, with or without error.
    pub fn is_completed(&self) -> bool {
        self.state != CursorState::Active
    }

    /// True if the cursor stopped because of a failure.
    pub fn did_error(&self) -> bool {
        self.state == CursorState::Errored
    }

    /// Check if a write requires a rearm before the next step.
    pub fn needs_rearm(&self) -> bool {
        self.needs_rearm
    }

    /// Snapshot of the current position.
    pub fn record(&self) -> CursorRecord {
        CursorRecord {
            key: self.current_key.clone(),
            primary_key: self.current_primary_key.clone(),
            value: self.current_value.clone(),
        }
    }

    /// Note that records of the scanned object store changed.
    pub fn mark_records_changed(&mut self) {
        self.needs_rearm = true;
    }

    /// Move `count` steps forward in the cursor's direction.
    ///
    /// For the no-duplicate directions one step skips every row sharing the
    /// current key. Running off the end of the range stops early and is not
    /// an error.
    pub fn advance(&mut self, conn: &Connection, count: u32) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "cursor advance count must be at least 1".into(),
            ));
        }

        match self.state {
            CursorState::Errored => return Err(Error::CursorErrored(self.id)),
            CursorState::Completed => return Err(Error::CursorCompleted(self.id)),
            CursorState::Active => {}
        }

        for _ in 0..count {
            if self.direction.is_unique() {
                self.advance_unique(conn)?;
            } else {
                self.advance_once(conn)?;
            }

            if self.state == CursorState::Completed {
                break;
            }
        }

        Ok(())
    }

    /// Step once, then keep stepping until the current key reaches `target`.
    ///
    /// With no target this is exactly `advance(1)`.
    pub fn iterate(&mut self, conn: &Connection, target: Option<&KeyData>) -> Result<()> {
        self.advance(conn, 1)?;

        let target = match target {
            Some(target) => target,
            None => return Ok(()),
        };

        loop {
            let reached = match &self.current_key {
                Some(current) => self.direction.has_reached(current, target),
                None => true,
            };
            if reached {
                return Ok(());
            }
            self.advance(conn, 1)?;
        }
    }

    fn advance_unique(&mut self, conn: &Connection) -> Result<()> {
        let start_key = self.current_key.clone();

        loop {
            self.advance_once(conn)?;
            if self.state != CursorState::Active {
                return Ok(());
            }

            match (&start_key, &self.current_key) {
                (Some(start), Some(current)) if start == current => continue,
                _ => return Ok(()),
            }
        }
    }

    fn advance_once(&mut self, conn: &Connection) -> Result<()> {
        if self.needs_rearm {
            self.rearm(conn)?;
        }

        while self.internal_advance_once(conn)? == StepOutcome::ShouldAdvanceAgain {}
        Ok(())
    }

    fn rearm(&mut self, conn: &Connection) -> Result<()> {
        self.needs_rearm = false;

        // Nothing reported yet, so nothing can be revisited or skipped.
        let current = match &self.current_key {
            Some(key) => key.clone(),
            None => return Ok(()),
        };

        if self.direction.is_next_family() {
            self.current_lower = current.clone();
            self.lower_inclusive = true;
        } else {
            self.current_upper = current.clone();
            self.upper_inclusive = true;
        }

        let bounds = ScanBounds::new(
            &self.current_lower,
            self.lower_inclusive,
            &self.current_upper,
            self.upper_inclusive,
        );
        let rebound = match &self.last_index_row {
            Some(position) => self.query.rebind_after(conn, bounds, position.clone()),
            None => self.query.rebind(conn, bounds),
        };
        if let Err(err) = rebound {
            error!(cursor_id = self.id, %err, "failed to rebind cursor query");
            self.fail();
            return Err(err);
        }

        self.metrics.rearms.inc();
        debug!(cursor_id = self.id, key = %current, "rearmed cursor");
        Ok(())
    }

    fn internal_advance_once(&mut self, conn: &Connection) -> Result<StepOutcome> {
        let row = match self.query.step(conn) {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.complete();
                return Ok(StepOutcome::Advanced);
            }
            Err(err) => {
                error!(cursor_id = self.id, %err, "error stepping cursor query");
                self.fail();
                return Err(err);
            }
        };

        if self.last_row_id == Some(row.row_id) {
            trace!(cursor_id = self.id, row_id = row.row_id, "skipping row already reported");
            self.metrics.stale_rows_skipped.inc();
            return Ok(StepOutcome::ShouldAdvanceAgain);
        }

        let key = self.decode(&row.key)?;

        match self.source {
            ScanSource::ObjectStore(_) => {
                self.current_primary_key = Some(key.clone());
                self.current_key = Some(key);
                self.current_value = Bytes::from(row.value);
            }
            ScanSource::Index {
                object_store_id, ..
            } => {
                let primary_key = self.decode(&row.value)?;
                let value = match self.lookup_primary(conn, object_store_id, &row) {
                    Ok(Some(value)) => value,
                    Ok(None) => {
                        debug!(
                            cursor_id = self.id,
                            primary_key = %primary_key,
                            "skipping index entry without a primary record"
                        );
                        self.metrics.orphans_skipped.inc();
                        return Ok(StepOutcome::ShouldAdvanceAgain);
                    }
                    Err(err) => {
                        error!(cursor_id = self.id, %err, "primary record lookup failed");
                        self.fail();
                        return Err(err);
                    }
                };

                self.current_key = Some(key);
                self.current_primary_key = Some(primary_key);
                self.current_value = value;
                self.last_index_row = Some(row.clone());
            }
        }

        self.last_row_id = Some(row.row_id);
        self.metrics.rows_returned.inc();
        Ok(StepOutcome::Advanced)
    }

    fn lookup_primary(
        &self,
        conn: &Connection,
        object_store_id: ObjectStoreId,
        row: &RawRow,
    ) -> Result<Option<Bytes>> {
        RecordStore::new(conn).get_record(object_store_id, &row.value)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<KeyData> {
        decode_key(bytes).map_err(|err| {
            error!(cursor_id = self.id, %err, "unable to decode stored key");
            self.fail();
            err
        })
    }

    fn complete(&mut self) {
        self.state = CursorState::Completed;
        self.current_key = None;
        self.current_primary_key = None;
        self.current_value = Bytes::new();
    }

    fn fail(&mut self) {
        self.state = CursorState::Errored;
        self.metrics.cursor_errors.inc();
    }
}
