use crate::analyzers::types::{AgencyIndexEntry, OnTimePerformance, RouteAggregate};
use crate::analyzers::utility::{round2, weighted_mean};
use crate::schedule::ScheduleStore;
use tracing::warn;

/// Joins route aggregates with route metadata, producing one performance
/// row per `(agency_id, route_id)`. Aggregates whose route is not in the
/// schedule are skipped.
pub fn score<S: ScheduleStore + ?Sized>(
    aggregates: &[RouteAggregate],
    schedule: &S,
) -> Vec<OnTimePerformance> {
    aggregates
        .iter()
        .filter_map(|agg| {
            let Some(route) = schedule.route(&agg.agency_id, &agg.route_id) else {
                warn!(
                    agency_id = %agg.agency_id,
                    route_id = %agg.route_id,
                    "Aggregate for route missing from schedule"
                );
                return None;
            };
            Some(OnTimePerformance {
                agency_id: agg.agency_id.clone(),
                route_id: agg.route_id.clone(),
                route_short_name: route.route_short_name.clone(),
                route_long_name: route.route_long_name.clone(),
                average_delay_minutes: agg.average_delay_minutes.map(round2),
                total_trips: agg.total_trips,
                delayed_trips: agg.delayed_trips,
            })
        })
        .collect()
}

/// Summarizes an agency's rows for the published index. Route averages
/// are weighted by the trips that contributed to them.
pub fn index_entry(agency_id: &str, rows: &[OnTimePerformance]) -> AgencyIndexEntry {
    let weighted: Vec<(f64, f64)> = rows
        .iter()
        .filter(|r| r.delayed_trips > 0)
        .filter_map(|r| r.average_delay_minutes.map(|avg| (avg, r.delayed_trips as f64)))
        .collect();

    AgencyIndexEntry {
        agency_id: agency_id.to_string(),
        routes: rows.len(),
        total_trips: rows.iter().map(|r| r.total_trips).sum(),
        average_delay_minutes: weighted_mean(&weighted).map(round2),
    }
}
