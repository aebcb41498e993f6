use crate::reconciler::MatchKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-agency counts of one analysis run, appended as a CSV row when
/// requested.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunDiagnostics {
    pub timestamp: DateTime<Utc>,
    pub agency: String,
    pub processed: usize,
    pub dropped_malformed: usize,
    pub dropped_stale: usize,
    pub exact: usize,
    pub normalized: usize,
    pub fallback_window: usize,
    pub unmatched: usize,
    pub unknown_route: usize,
    pub routes_written: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunDiagnostics {
    pub fn new(agency: &str, timestamp: DateTime<Utc>) -> Self {
        RunDiagnostics {
            timestamp,
            agency: agency.to_string(),
            ..Default::default()
        }
    }

    pub fn record_match(&mut self, kind: MatchKind) {
        match kind {
            MatchKind::Exact => self.exact += 1,
            MatchKind::Normalized => self.normalized += 1,
            MatchKind::FallbackWindow => self.fallback_window += 1,
            MatchKind::Unmatched => self.unmatched += 1,
        }
    }

    pub fn matched(&self) -> usize {
        self.exact + self.normalized + self.fallback_window
    }

    /// Share of reconciled records that resolved to a trip on a known
    /// route, in percent.
    pub fn match_rate(&self) -> Option<f64> {
        let reconciled = self.matched() + self.unmatched + self.unknown_route;
        if reconciled == 0 {
            return None;
        }
        Some(self.matched() as f64 / reconciled as f64 * 100.0)
    }

    pub fn set_error(&mut self, error_type: &str, message: impl ToString) {
        self.error_type = Some(error_type.to_string());
        self.error_message = Some(message.to_string());
    }
}

/// Counts of one ingest pass over a feed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestDiagnostics {
    pub fetched: usize,
    pub dropped_malformed: usize,
    pub appended: usize,
    pub duplicates: usize,
}

impl IngestDiagnostics {
    pub fn merge(&mut self, other: IngestDiagnostics) {
        self.fetched += other.fetched;
        self.dropped_malformed += other.dropped_malformed;
        self.appended += other.appended;
        self.duplicates += other.duplicates;
    }
}
