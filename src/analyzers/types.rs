//! Data types used by the analysis pipeline.

use crate::reconciler::MatchKind;
use crate::records::TripUpdateRecord;
use crate::schedule::StaticTrip;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record the reconciler resolved to a scheduled trip on a known route.
#[derive(Debug, Clone, Copy)]
pub struct MatchedRecord<'a> {
    pub record: &'a TripUpdateRecord,
    pub kind: MatchKind,
    pub trip: &'a StaticTrip,
}

/// Delay statistics for a single route within one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAggregate {
    pub agency_id: String,
    pub route_id: String,
    /// Distinct scheduled trips represented in the run.
    pub total_trips: u64,
    /// Represented trips that contributed a delay to the mean.
    pub delayed_trips: u64,
    /// Mean arrival delay in minutes; `None` when no trip contributed.
    pub average_delay_minutes: Option<f64>,
}

/// Current-state on-time performance of one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnTimePerformance {
    pub agency_id: String,
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub average_delay_minutes: Option<f64>,
    pub total_trips: u64,
    /// Trips that contributed a delay to `average_delay_minutes`.
    pub delayed_trips: u64,
}

/// Per-agency document uploaded by `publish`.
#[derive(Debug, Serialize)]
pub struct AgencyPerformance {
    pub schema_version: u8,
    pub agency_id: String,
    pub generated_at: DateTime<Utc>,
    pub routes: Vec<OnTimePerformance>,
}

/// Summary entry for the published index.
#[derive(Debug, Serialize)]
pub struct AgencyIndexEntry {
    pub agency_id: String,
    pub routes: usize,
    pub total_trips: u64,
    /// Mean of route averages, weighted by each route's trip count.
    pub average_delay_minutes: Option<f64>,
}

/// Top-level index of all published agencies, served as `performance/index.json`.
#[derive(Debug, Serialize)]
pub struct PerformanceIndex {
    pub generated_at: DateTime<Utc>,
    pub agencies: Vec<AgencyIndexEntry>,
}
