//! Metrics for cursor and store activity.
//!
//! - **Cursor metrics**: opens, rows returned, rearms, skipped rows, failures
//! - **Record metrics**: writes and deletes
//! - **Transaction metrics**: begins, commits, rollbacks
//! - **Prometheus export**: text exposition format

mod store_metrics;

pub use store_metrics::{Counter, Gauge, MetricsSummary, StoreMetrics};
