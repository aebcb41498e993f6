//! Persistence seams for raw trip updates and performance results.
//!
//! The analysis core only sees the traits below. [`SqliteStore`] backs the
//! CLI; [`MemoryStore`] backs library callers and tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::analyzers::types::OnTimePerformance;
use crate::error::StoreResult;
use crate::records::TripUpdateRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Half-open ingestion time range `[start, end)`, fixed at run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window covering `lookback` up to (excluding) `end`.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Result of appending a batch to the raw ingestion sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    /// Records whose `(ingestion_timestamp_utc, agency, trip_id)` key
    /// already existed; they are ignored.
    pub duplicates: usize,
}

/// Everything ingested within one [`TimeWindow`], read as one consistent
/// snapshot of the sink.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WindowContents {
    /// Records per agency label, ordered by ingestion time then trip id.
    pub updates: BTreeMap<String, Vec<TripUpdateRecord>>,
    /// Malformed updates rejected at ingestion, per agency label.
    pub rejections: BTreeMap<String, usize>,
}

impl WindowContents {
    /// Removes and returns the records and rejection count of `agency`.
    pub fn take_agency(&mut self, agency: &str) -> (Vec<TripUpdateRecord>, usize) {
        (
            self.updates.remove(agency).unwrap_or_default(),
            self.rejections.remove(agency).unwrap_or_default(),
        )
    }
}

/// Read side of the raw ingestion sink.
pub trait UpdateSource {
    /// Every record and rejection count ingested within `window`. Appends
    /// committed while the read is in progress are not observed.
    fn read_window(&self, window: &TimeWindow) -> StoreResult<WindowContents>;
}

/// Append-only write side of the raw ingestion sink.
pub trait UpdateSink {
    fn append_updates(&mut self, records: &[TripUpdateRecord]) -> StoreResult<AppendOutcome>;

    /// Adds per-agency counts of malformed updates rejected from the batch
    /// ingested at `ingested_at`.
    fn record_rejections(
        &mut self,
        ingested_at: DateTime<Utc>,
        counts: &BTreeMap<String, usize>,
    ) -> StoreResult<()>;
}

/// Current-state on-time performance rows.
pub trait ResultsStore {
    /// Replaces every row of `agency_id` with `rows`, atomically. On error
    /// the previous rows are left untouched.
    fn replace_agency(&mut self, agency_id: &str, rows: &[OnTimePerformance]) -> StoreResult<()>;

    /// Rows ordered by `(agency_id, route_id)`, optionally for one agency.
    fn performance(&self, agency_id: Option<&str>) -> StoreResult<Vec<OnTimePerformance>>;
}
