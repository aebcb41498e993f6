//! Raw and canonical trip update records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical trip status shared by all agencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentStatus {
    Scheduled,
    InTransit,
    StoppedAt,
    Canceled,
    Unknown,
}

impl CurrentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrentStatus::Scheduled => "scheduled",
            CurrentStatus::InTransit => "in_transit",
            CurrentStatus::StoppedAt => "stopped_at",
            CurrentStatus::Canceled => "canceled",
            CurrentStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(CurrentStatus::Scheduled),
            "in_transit" => Ok(CurrentStatus::InTransit),
            "stopped_at" => Ok(CurrentStatus::StoppedAt),
            "canceled" => Ok(CurrentStatus::Canceled),
            "unknown" => Ok(CurrentStatus::Unknown),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// One update message as the provider sent it, before normalization.
///
/// Delays are in the agency's configured unit and times are unix seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTripUpdate {
    pub agency: Option<String>,
    pub line_group: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    /// Service date as `YYYYMMDD`.
    pub start_date: Option<String>,
    pub status: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub arrival_delay: Option<i64>,
    pub departure_delay: Option<i64>,
    pub arrival_time: Option<i64>,
    pub departure_time: Option<i64>,
    pub feed_timestamp: Option<i64>,
}

/// Canonical, append-only trip update fact.
///
/// Unique by `(ingestion_timestamp_utc, agency, trip_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdateRecord {
    pub ingestion_timestamp_utc: DateTime<Utc>,
    pub agency: String,
    pub line_group: Option<String>,
    pub trip_id: String,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_date: Option<String>,
    pub current_status: CurrentStatus,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub arrival_delay_seconds: Option<i64>,
    pub departure_delay_seconds: Option<i64>,
    pub predicted_arrival_time: Option<DateTime<Utc>>,
    pub predicted_departure_time: Option<DateTime<Utc>>,
    pub last_update_timestamp_feed: Option<DateTime<Utc>>,
}

impl TripUpdateRecord {
    /// Predicted departure, or predicted arrival when the feed only gave that.
    pub fn predicted_time(&self) -> Option<DateTime<Utc>> {
        self.predicted_departure_time.or(self.predicted_arrival_time)
    }
}
