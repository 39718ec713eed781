//! Backing store and cursor activity metrics.
//!
//! Every counter lives in one [`StoreMetrics`] behind an `Arc`, shared by the
//! store, its transactions, and their cursors. Reads are relaxed: a summary
//! taken while a cursor steps may mix values from either side of the step.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of times something happened.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Number of live objects, such as registered cursors.
///
/// Releasing more than are live clamps at zero.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.sub(1);
    }

    pub fn sub(&self, n: u64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| Some(live.saturating_sub(n)));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters shared by a backing store and every cursor it creates.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    // Cursors
    /// Cursors successfully created.
    pub cursors_opened: Counter,
    /// Cursors currently registered.
    pub open_cursors: Gauge,
    /// Rows reported to callers.
    pub rows_returned: Counter,
    /// Range queries rebuilt after a mutation.
    pub rearms: Counter,
    /// Rows discarded because they were the row already reported.
    pub stale_rows_skipped: Counter,
    /// Index entries skipped because their primary record was gone.
    pub orphans_skipped: Counter,
    /// Cursors that moved to the errored state.
    pub cursor_errors: Counter,

    // Records
    pub records_written: Counter,
    pub records_deleted: Counter,

    // Transactions
    pub txn_begin: Counter,
    pub txn_commit: Counter,
    pub txn_rollback: Counter,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as Prometheus metrics.
    pub fn to_prometheus(&self) -> String {
        let counters = [
            ("cursors_opened_total", "Cursors created", self.cursors_opened.get()),
            ("cursor_rows_total", "Rows returned by cursors", self.rows_returned.get()),
            ("cursor_rearms_total", "Range queries rebuilt after a write", self.rearms.get()),
            ("cursor_stale_rows_total", "Duplicate rows skipped after a rearm", self.stale_rows_skipped.get()),
            ("cursor_orphans_total", "Orphaned index entries skipped", self.orphans_skipped.get()),
            ("cursor_errors_total", "Cursors that failed", self.cursor_errors.get()),
            ("records_written_total", "Records written", self.records_written.get()),
            ("records_deleted_total", "Records deleted", self.records_deleted.get()),
            ("txn_begin_total", "Transactions started", self.txn_begin.get()),
            ("txn_commit_total", "Transactions committed", self.txn_commit.get()),
            ("txn_rollback_total", "Transactions rolled back", self.txn_rollback.get()),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP cursordb_{} {}\n", name, help));
            output.push_str(&format!("# TYPE cursordb_{} counter\n", name));
            output.push_str(&format!("cursordb_{} {}\n\n", name, value));
        }

        output.push_str("# HELP cursordb_open_cursors Cursors currently open\n");
        output.push_str("# TYPE cursordb_open_cursors gauge\n");
        output.push_str(&format!("cursordb_open_cursors {}\n", self.open_cursors.get()));
        output
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            cursors_opened: self.cursors_opened.get(),
            open_cursors: self.open_cursors.get(),
            rows_returned: self.rows_returned.get(),
            rearms: self.rearms.get(),
            stale_rows_skipped: self.stale_rows_skipped.get(),
            orphans_skipped: self.orphans_skipped.get(),
            cursor_errors: self.cursor_errors.get(),
            records_written: self.records_written.get(),
            records_deleted: self.records_deleted.get(),
            txn_begin: self.txn_begin.get(),
            txn_commit: self.txn_commit.get(),
            txn_rollback: self.txn_rollback.get(),
        }
    }
}

/// Point-in-time copy of [`StoreMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub cursors_opened: u64,
    pub open_cursors: u64,
    pub rows_returned: u64,
    pub rearms: u64,
    pub stale_rows_skipped: u64,
    pub orphans_skipped: u64,
    pub cursor_errors: u64,
    pub records_written: u64,
    pub records_deleted: u64,
    pub txn_begin: u64,
    pub txn_commit: u64,
    pub txn_rollback: u64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Store Metrics Summary ===")?;
        writeln!(f)?;
        writeln!(f, "Cursors:")?;
        writeln!(f, "  Opened:  {} ({} open)", self.cursors_opened, self.open_cursors)?;
        writeln!(f, "  Rows:    {}", self.rows_returned)?;
        writeln!(f, "  Rearms:  {}", self.rearms)?;
        writeln!(f, "  Stale:   {}", self.stale_rows_skipped)?;
        writeln!(f, "  Orphans: {}", self.orphans_skipped)?;
        writeln!(f, "  Errors:  {}", self.cursor_errors)?;
        writeln!(f)?;
        writeln!(f, "Records:")?;
        writeln!(f, "  Written: {}", self.records_written)?;
        writeln!(f, "  Deleted: {}", self.records_deleted)?;
        writeln!(f)?;
        writeln!(f, "Transactions:")?;
        writeln!(f, "  Begun:       {}", self.txn_begin)?;
        writeln!(f, "  Committed:   {}", self.txn_commit)?;
        writeln!(f, "  Rolled back: {}", self.txn_rollback)?;
        Ok(())
    }
}
