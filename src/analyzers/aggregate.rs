use crate::analyzers::types::{MatchedRecord, RouteAggregate};
use crate::analyzers::utility::mean;
use crate::records::CurrentStatus;
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

/// Orders two records resolving to the same scheduled trip; the greater one
/// represents the trip. Latest ingestion wins, then the latest provider
/// timestamp, then the stronger match, then the smaller real-time id.
/// Delays settle records that agree on all of these.
fn representative_order(a: &MatchedRecord<'_>, b: &MatchedRecord<'_>) -> Ordering {
    let key = |m: &MatchedRecord<'_>| {
        (
            m.record.ingestion_timestamp_utc,
            m.record.last_update_timestamp_feed,
            Reverse(m.kind),
        )
    };
    key(a)
        .cmp(&key(b))
        .then_with(|| b.record.trip_id.cmp(&a.record.trip_id))
        .then_with(|| {
            (a.record.arrival_delay_seconds, a.record.departure_delay_seconds)
                .cmp(&(b.record.arrival_delay_seconds, b.record.departure_delay_seconds))
        })
}

/// Aggregates matched records into per-route delay statistics.
///
/// Repeated polls of one scheduled trip collapse to a single representative
/// record, so `total_trips` counts each trip once. The mean covers
/// represented trips that carry an arrival delay and are not canceled.
/// Output is ordered by `(agency_id, route_id)` and does not depend on the
/// order of `matched`.
pub fn aggregate_routes<'a>(
    matched: impl IntoIterator<Item = MatchedRecord<'a>>,
) -> Vec<RouteAggregate> {
    let mut representatives: BTreeMap<(&'a str, &'a str), MatchedRecord<'a>> = BTreeMap::new();

    for m in matched {
        let key = (m.trip.agency_id.as_str(), m.trip.trip_id.as_str());
        match representatives.get(&key) {
            Some(current) if representative_order(&m, current) != Ordering::Greater => {}
            _ => {
                representatives.insert(key, m);
            }
        }
    }

    // (agency_id, route_id) -> (trip count, delays in minutes)
    let mut routes: BTreeMap<(&'a str, &'a str), (u64, Vec<f64>)> = BTreeMap::new();
    for m in representatives.values() {
        let entry = routes
            .entry((m.trip.agency_id.as_str(), m.trip.route_id.as_str()))
            .or_default();
        entry.0 += 1;

        if m.record.current_status == CurrentStatus::Canceled {
            continue;
        }
        if let Some(delay) = m.record.arrival_delay_seconds {
            entry.1.push(delay as f64 / 60.0);
        }
    }

    routes
        .into_iter()
        .map(|((agency_id, route_id), (total_trips, delays))| RouteAggregate {
            agency_id: agency_id.to_string(),
            route_id: route_id.to_string(),
            total_trips,
            delayed_trips: delays.len() as u64,
            average_delay_minutes: mean(&delays),
        })
        .collect()
}
