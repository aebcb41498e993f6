//! Decoding of GTFS Realtime feeds into raw trip update messages.

use crate::gtfs_rt::trip_descriptor::ScheduleRelationship;
use crate::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
use crate::gtfs_rt::{FeedMessage, TripUpdate};
use crate::records::RawTripUpdate;
use anyhow::Result;
use prost::Message;
use std::collections::HashMap;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Extracts one raw update per `TripUpdate` entity of `feed`.
///
/// Delays and predicted times come from the first stop time update that
/// carries any of them. A vehicle position for the same trip refines the
/// status unless the trip is canceled.
pub fn extract_trip_updates(
    feed: &FeedMessage,
    agency: &str,
    line_group: Option<&str>,
) -> Vec<RawTripUpdate> {
    let vehicle_status: HashMap<&str, &'static str> = feed
        .entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.vehicle.as_ref())
        .filter(|v| v.current_status.is_some())
        .filter_map(|v| {
            let trip_id = v.trip.as_ref()?.trip_id.as_deref()?;
            Some((trip_id, v.current_status().as_str_name()))
        })
        .collect();

    feed.entity
        .iter()
        .filter(|e| !e.is_deleted())
        .filter_map(|e| e.trip_update.as_ref())
        .map(|tu| {
            let mut raw = raw_update(tu, agency, line_group);
            raw.feed_timestamp = tu
                .timestamp
                .or(feed.header.timestamp)
                .and_then(|ts| i64::try_from(ts).ok());
            raw.status = status(tu, &vehicle_status).map(str::to_string);
            raw
        })
        .collect()
}

fn raw_update(tu: &TripUpdate, agency: &str, line_group: Option<&str>) -> RawTripUpdate {
    let trip = &tu.trip;
    let mut raw = RawTripUpdate {
        agency: Some(agency.to_string()),
        line_group: line_group.map(str::to_string),
        trip_id: trip.trip_id.clone(),
        route_id: trip.route_id.clone(),
        direction_id: trip.direction_id,
        start_date: trip.start_date.clone(),
        ..Default::default()
    };

    if let Some(stu) = tu.stop_time_update.iter().find(|s| has_observation(s)) {
        raw.stop_id = stu.stop_id.clone();
        raw.stop_sequence = stu.stop_sequence;
        raw.arrival_delay = stu.arrival.as_ref().and_then(|e| e.delay).map(i64::from);
        raw.departure_delay = stu.departure.as_ref().and_then(|e| e.delay).map(i64::from);
        raw.arrival_time = stu.arrival.as_ref().and_then(event_time);
        raw.departure_time = stu.departure.as_ref().and_then(event_time);
    }

    if raw.arrival_delay.is_none() && raw.departure_delay.is_none() {
        if let Some(delay) = tu.delay {
            raw.arrival_delay = Some(i64::from(delay));
            raw.departure_delay = Some(i64::from(delay));
        }
    }
    raw
}

/// Absolute event time; `0` means unset.
fn event_time(event: &StopTimeEvent) -> Option<i64> {
    event.time.filter(|&t| t != 0)
}

fn has_observation(stu: &StopTimeUpdate) -> bool {
    [&stu.arrival, &stu.departure]
        .into_iter()
        .flatten()
        .any(|e| e.delay.is_some() || event_time(e).is_some())
}

fn status(tu: &TripUpdate, vehicle_status: &HashMap<&str, &'static str>) -> Option<&'static str> {
    let relationship = tu
        .trip
        .schedule_relationship
        .is_some()
        .then(|| tu.trip.schedule_relationship());

    if matches!(
        relationship,
        Some(ScheduleRelationship::Canceled | ScheduleRelationship::Deleted)
    ) {
        return relationship.map(|r| r.as_str_name());
    }

    tu.trip
        .trip_id
        .as_deref()
        .and_then(|id| vehicle_status.get(id).copied())
        .or(relationship.map(|r| r.as_str_name()))
}
