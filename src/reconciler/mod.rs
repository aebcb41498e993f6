//! Resolves real-time trip identifiers to scheduled trips.
//!
//! Matching runs in tiers and stops at the first hit:
//!
//! 1. exact `(agency_id, trip_id)` lookup,
//! 2. lookup of the id rewritten by the agency's [`IdRule`](strategy::IdRule),
//! 3. the departure-window fallback over trips sharing route and direction,
//!    when the agency enables it.
//!
//! Resolution is a pure function of the record, the agency entry and the
//! schedule snapshot.

pub mod strategy;

use crate::config::Agency;
use crate::records::TripUpdateRecord;
use crate::schedule::{ScheduleStore, StaticTrip};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use strategy::Fallback;

const SECONDS_PER_DAY: i64 = 86_400;

/// How a record was matched. Ordered from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Normalized,
    FallbackWindow,
    Unmatched,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchKind::Exact => "exact",
            MatchKind::Normalized => "normalized",
            MatchKind::FallbackWindow => "fallback_window",
            MatchKind::Unmatched => "unmatched",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'s> {
    Matched {
        kind: MatchKind,
        trip: &'s StaticTrip,
    },
    Unmatched,
}

impl<'s> Resolution<'s> {
    pub fn kind(&self) -> MatchKind {
        match self {
            Resolution::Matched { kind, .. } => *kind,
            Resolution::Unmatched => MatchKind::Unmatched,
        }
    }

    pub fn trip(&self) -> Option<&'s StaticTrip> {
        match self {
            Resolution::Matched { trip, .. } => Some(*trip),
            Resolution::Unmatched => None,
        }
    }
}

pub struct Reconciler<'s, S: ScheduleStore + ?Sized> {
    schedule: &'s S,
}

impl<'s, S: ScheduleStore + ?Sized> Reconciler<'s, S> {
    pub fn new(schedule: &'s S) -> Self {
        Self { schedule }
    }

    pub fn resolve(&self, agency: &Agency, record: &TripUpdateRecord) -> Resolution<'s> {
        let schedule: &'s S = self.schedule;
        let static_id = agency.static_agency_id();
        let strategy = agency.strategy();

        if let Some(trip) = schedule.trip(static_id, &record.trip_id) {
            return Resolution::Matched {
                kind: MatchKind::Exact,
                trip,
            };
        }

        if let Some(rule) = &strategy.normalize {
            let normalized = rule.apply(&record.trip_id);
            if !normalized.is_empty() && normalized != record.trip_id {
                if let Some(trip) = schedule.trip(static_id, &normalized) {
                    return Resolution::Matched {
                        kind: MatchKind::Normalized,
                        trip,
                    };
                }
            }
        }

        if let Fallback::Window { tolerance_secs } = strategy.fallback {
            if let Some(trip) = self.closest_departure(agency, record, i64::from(tolerance_secs)) {
                return Resolution::Matched {
                    kind: MatchKind::FallbackWindow,
                    trip,
                };
            }
        }

        Resolution::Unmatched
    }

    /// Trip on the record's route and direction whose scheduled departure is
    /// nearest the predicted time, within `tolerance` seconds. Candidates
    /// come sorted by `trip_id`, so keeping only strictly closer ones breaks
    /// ties toward the smallest id.
    fn closest_departure(
        &self,
        agency: &Agency,
        record: &TripUpdateRecord,
        tolerance: i64,
    ) -> Option<&'s StaticTrip> {
        let schedule: &'s S = self.schedule;
        let static_id = agency.static_agency_id();
        let route_id = record.route_id.as_deref()?;
        let predicted = record.predicted_time()?.with_timezone(&agency.tz);
        let time_of_day = i64::from(predicted.num_seconds_from_midnight());

        let mut best: Option<(i64, &'s StaticTrip)> = None;
        for trip in schedule.trips_for(static_id, route_id, record.direction_id) {
            let Some(scheduled) =
                self.scheduled_departure(static_id, &trip.trip_id, record.stop_id.as_deref())
            else {
                continue;
            };
            let distance = clock_distance(i64::from(scheduled), time_of_day);
            if distance > tolerance {
                continue;
            }
            if best.is_none_or(|(d, _)| distance < d) {
                best = Some((distance, trip));
            }
        }

        best.map(|(_, trip)| trip)
    }

    /// Departure at `stop_id` when the trip serves it, otherwise the trip's
    /// first timed departure.
    fn scheduled_departure(
        &self,
        agency_id: &str,
        trip_id: &str,
        stop_id: Option<&str>,
    ) -> Option<u32> {
        let times = self.schedule.stop_times(agency_id, trip_id);
        stop_id
            .and_then(|id| times.iter().find(|t| t.stop_id == id))
            .and_then(|t| t.departure_or_arrival())
            .or_else(|| times.iter().find_map(|t| t.departure_or_arrival()))
    }
}

/// Distance between two times of day in seconds, wrapping at midnight.
/// Static times past 24:00 fold back onto the clock.
fn clock_distance(scheduled: i64, time_of_day: i64) -> i64 {
    let diff = (scheduled.rem_euclid(SECONDS_PER_DAY) - time_of_day).abs();
    diff.min(SECONDS_PER_DAY - diff)
}
