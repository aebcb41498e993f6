//! Immutable static schedule snapshot.
//!
//! A snapshot is built once per schedule refresh and shared read-only
//! (usually behind an `Arc`) with every run that uses it. Refreshing the
//! schedule means building a new snapshot, never mutating this one.

use crate::schedule::types::{Route, StaticTrip, Stop, StopTime};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Read access to static schedule reference data.
pub trait ScheduleStore {
    fn route(&self, agency_id: &str, route_id: &str) -> Option<&Route>;
    fn stop(&self, agency_id: &str, stop_id: &str) -> Option<&Stop>;
    fn trip(&self, agency_id: &str, trip_id: &str) -> Option<&StaticTrip>;
    /// Stop times of a trip in stop sequence order.
    fn stop_times(&self, agency_id: &str, trip_id: &str) -> &[StopTime];
    /// Trips on a route, ordered by `trip_id`. `None` direction means any.
    fn trips_for(
        &self,
        agency_id: &str,
        route_id: &str,
        direction_id: Option<u32>,
    ) -> Vec<&StaticTrip>;
    /// Whether the agency has a usable (non-empty) schedule.
    fn has_schedule(&self, agency_id: &str) -> bool;
}

/// Schedule tables of a single agency with lookup indexes.
#[derive(Debug, Clone, Default)]
pub struct AgencySchedule {
    routes: HashMap<String, Route>,
    stops: HashMap<String, Stop>,
    trips: HashMap<String, StaticTrip>,
    stop_times: HashMap<String, Vec<StopTime>>,
    /// route_id -> trip ids sorted ascending
    trips_by_route: HashMap<String, Vec<String>>,
}

impl AgencySchedule {
    /// Builds the indexes. Duplicate keys keep the first row, matching the
    /// primary-key semantics of the schedule tables.
    pub fn new(
        routes: Vec<Route>,
        stops: Vec<Stop>,
        trips: Vec<StaticTrip>,
        stop_times: Vec<StopTime>,
    ) -> Self {
        let mut schedule = AgencySchedule::default();

        for route in routes {
            schedule
                .routes
                .entry(route.route_id.clone())
                .or_insert(route);
        }
        for stop in stops {
            schedule.stops.entry(stop.stop_id.clone()).or_insert(stop);
        }
        for trip in trips {
            schedule.trips.entry(trip.trip_id.clone()).or_insert(trip);
        }

        for stop_time in stop_times {
            let times = schedule
                .stop_times
                .entry(stop_time.trip_id.clone())
                .or_default();
            if !times
                .iter()
                .any(|t| t.stop_sequence == stop_time.stop_sequence)
            {
                times.push(stop_time);
            }
        }
        for times in schedule.stop_times.values_mut() {
            times.sort_by_key(|t| t.stop_sequence);
        }

        for trip in schedule.trips.values() {
            schedule
                .trips_by_route
                .entry(trip.route_id.clone())
                .or_default()
                .push(trip.trip_id.clone());
        }
        for ids in schedule.trips_by_route.values_mut() {
            ids.sort();
        }

        schedule
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    agencies: HashMap<String, AgencySchedule>,
    pub loaded_at: DateTime<Utc>,
}

impl ScheduleSnapshot {
    pub fn new(agencies: HashMap<String, AgencySchedule>, loaded_at: DateTime<Utc>) -> Self {
        Self {
            agencies,
            loaded_at,
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new(), Utc::now())
    }

    pub fn agency(&self, agency_id: &str) -> Option<&AgencySchedule> {
        self.agencies.get(agency_id)
    }
}

impl ScheduleStore for ScheduleSnapshot {
    fn route(&self, agency_id: &str, route_id: &str) -> Option<&Route> {
        self.agency(agency_id)?.routes.get(route_id)
    }

    fn stop(&self, agency_id: &str, stop_id: &str) -> Option<&Stop> {
        self.agency(agency_id)?.stops.get(stop_id)
    }

    fn trip(&self, agency_id: &str, trip_id: &str) -> Option<&StaticTrip> {
        self.agency(agency_id)?.trips.get(trip_id)
    }

    fn stop_times(&self, agency_id: &str, trip_id: &str) -> &[StopTime] {
        self.agency(agency_id)
            .and_then(|a| a.stop_times.get(trip_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn trips_for(
        &self,
        agency_id: &str,
        route_id: &str,
        direction_id: Option<u32>,
    ) -> Vec<&StaticTrip> {
        let Some(schedule) = self.agency(agency_id) else {
            return Vec::new();
        };
        let Some(ids) = schedule.trips_by_route.get(route_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| schedule.trips.get(id))
            .filter(|trip| direction_id.is_none() || trip.direction_id == direction_id)
            .collect()
    }

    fn has_schedule(&self, agency_id: &str) -> bool {
        self.agency(agency_id).is_some_and(|a| !a.is_empty())
    }
}
