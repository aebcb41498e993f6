//! Maps agency-specific raw update messages onto [`TripUpdateRecord`].

use crate::config::{Agency, AgencyTable};
use crate::error::MalformedFeedError;
use crate::records::{CurrentStatus, RawTripUpdate, TripUpdateRecord};
use crate::schedule::types::parse_service_date;
use crate::schedule::{ScheduleStore, StopTime};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Normalizes raw updates using the agency table and a schedule snapshot.
///
/// Agencies missing from the table are still normalized, with seconds as
/// the delay unit, the default status vocabulary and UTC as timezone.
pub struct Normalizer<'a, S: ScheduleStore + ?Sized> {
    agencies: &'a AgencyTable,
    schedule: &'a S,
}

impl<'a, S: ScheduleStore + ?Sized> Normalizer<'a, S> {
    pub fn new(agencies: &'a AgencyTable, schedule: &'a S) -> Self {
        Self { agencies, schedule }
    }

    pub fn normalize(
        &self,
        raw: &RawTripUpdate,
        ingested_at: DateTime<Utc>,
    ) -> Result<TripUpdateRecord, MalformedFeedError> {
        let agency_label =
            non_empty(raw.agency.as_deref()).ok_or(MalformedFeedError::MissingAgency)?;
        let trip_id = non_empty(raw.trip_id.as_deref()).ok_or_else(|| {
            MalformedFeedError::MissingTripId {
                agency: agency_label.to_string(),
            }
        })?;

        let agency = self.agencies.get(agency_label);
        let unit = agency.map(|a| a.config.delay_unit).unwrap_or_default();
        let tz = agency.map(|a| a.tz).unwrap_or(Tz::UTC);

        let current_status = canonical_status(
            raw.status.as_deref(),
            agency.map(|a| &a.config.status_map),
        );

        let arrival_delay_seconds = raw.arrival_delay.map(|d| unit.to_seconds(d));
        let departure_delay_seconds = raw.departure_delay.map(|d| unit.to_seconds(d));

        let start_date = non_empty(raw.start_date.as_deref()).map(str::to_string);
        let service_date = start_date
            .as_deref()
            .and_then(parse_service_date)
            .unwrap_or_else(|| ingested_at.with_timezone(&tz).date_naive());

        let stop_time = self.reference_stop_time(agency, agency_label, trip_id, raw);

        let predicted_arrival_time = unix_time(raw.arrival_time).or_else(|| {
            derive_predicted(
                stop_time.and_then(StopTime::arrival_or_departure),
                arrival_delay_seconds,
                service_date,
                tz,
            )
        });
        let predicted_departure_time = unix_time(raw.departure_time).or_else(|| {
            derive_predicted(
                stop_time.and_then(StopTime::departure_or_arrival),
                departure_delay_seconds,
                service_date,
                tz,
            )
        });

        Ok(TripUpdateRecord {
            ingestion_timestamp_utc: ingested_at,
            agency: agency_label.to_string(),
            line_group: non_empty(raw.line_group.as_deref()).map(str::to_string),
            trip_id: trip_id.to_string(),
            route_id: non_empty(raw.route_id.as_deref()).map(str::to_string),
            direction_id: raw.direction_id,
            start_date,
            current_status,
            stop_id: non_empty(raw.stop_id.as_deref()).map(str::to_string),
            stop_sequence: raw.stop_sequence,
            arrival_delay_seconds,
            departure_delay_seconds,
            predicted_arrival_time,
            predicted_departure_time,
            last_update_timestamp_feed: unix_time(raw.feed_timestamp),
        })
    }

    /// StopTime the raw update's delay refers to, located by stop sequence
    /// first and stop id second. The trip is looked up by its raw id, then
    /// by the agency's normalized id.
    fn reference_stop_time(
        &self,
        agency: Option<&Agency>,
        agency_label: &str,
        trip_id: &str,
        raw: &RawTripUpdate,
    ) -> Option<&'a StopTime> {
        let schedule: &'a S = self.schedule;
        let static_id = agency.map(Agency::static_agency_id).unwrap_or(agency_label);

        let mut times = schedule.stop_times(static_id, trip_id);
        if times.is_empty() {
            if let Some(rule) = agency.and_then(|a| a.strategy().normalize.as_ref()) {
                times = schedule.stop_times(static_id, &rule.apply(trip_id));
            }
        }

        raw.stop_sequence
            .and_then(|seq| times.iter().find(|t| t.stop_sequence == seq))
            .or_else(|| {
                let stop_id = non_empty(raw.stop_id.as_deref())?;
                times.iter().find(|t| t.stop_id == stop_id)
            })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn unix_time(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|&s| s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Maps a provider status onto the canonical vocabulary. Agency overrides
/// are consulted first; both lookups ignore case.
pub fn canonical_status(
    raw: Option<&str>,
    overrides: Option<&HashMap<String, CurrentStatus>>,
) -> CurrentStatus {
    let Some(raw) = non_empty(raw) else {
        return CurrentStatus::Unknown;
    };

    if let Some(status) = overrides.and_then(|map| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(raw))
            .map(|(_, status)| *status)
    }) {
        return status;
    }

    match raw.to_ascii_uppercase().as_str() {
        "SCHEDULED" | "ADDED" | "0" | "1" => CurrentStatus::Scheduled,
        "CANCELED" | "CANCELLED" | "DELETED" | "3" | "7" => CurrentStatus::Canceled,
        "IN_TRANSIT_TO" | "INCOMING_AT" | "IN_TRANSIT" => CurrentStatus::InTransit,
        "STOPPED_AT" => CurrentStatus::StoppedAt,
        _ => CurrentStatus::Unknown,
    }
}

/// Converts GTFS seconds-since-midnight on `service_date` to UTC,
/// rolling past midnight for times of 24:00 and later.
pub fn schedule_time_to_utc(seconds: u32, service_date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let midnight = service_date.and_hms_opt(0, 0, 0)?;
    let local = midnight + Duration::seconds(i64::from(seconds));
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn derive_predicted(
    scheduled: Option<u32>,
    delay_seconds: Option<i64>,
    service_date: NaiveDate,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    let planned = schedule_time_to_utc(scheduled?, service_date, tz)?;
    Some(planned + Duration::seconds(delay_seconds?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgencyConfig, DelayUnit};
    use crate::reconciler::strategy::IdRule;
    use crate::schedule::AgencySchedule;
    use crate::schedule::snapshot::test_support::*;
    use chrono::Timelike;

    fn table() -> AgencyTable {
        let mut bart = AgencyConfig::new("BART");
        bart.timezone = "America/Los_Angeles".into();
        let mut slow = AgencyConfig::new("SLOW");
        slow.delay_unit = DelayUnit::Minutes;
        slow.status_map
            .insert("late".into(), CurrentStatus::InTransit);
        let mut dated = AgencyConfig::new("DATED");
        dated.matching.normalize = Some(IdRule::StripServiceDate);
        AgencyTable::from_configs(vec![bart, slow, dated]).unwrap()
    }

    fn ingested() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 16, 0, 0).unwrap()
    }

    fn raw(agency: &str, trip_id: &str) -> RawTripUpdate {
        RawTripUpdate {
            agency: Some(agency.into()),
            trip_id: Some(trip_id.into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_agency_is_malformed() {
        let table = table();
        let snap = crate::schedule::ScheduleSnapshot::empty();
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("BART", "T1");
        r.agency = Some("  ".into());
        assert_eq!(
            n.normalize(&r, ingested()),
            Err(MalformedFeedError::MissingAgency)
        );
    }

    #[test]
    fn missing_trip_id_is_malformed() {
        let table = table();
        let snap = crate::schedule::ScheduleSnapshot::empty();
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("BART", "");
        assert!(matches!(
            n.normalize(&r, ingested()),
            Err(MalformedFeedError::MissingTripId { .. })
        ));
        r.trip_id = None;
        assert!(n.normalize(&r, ingested()).is_err());
    }

    #[test]
    fn status_vocabulary_and_overrides() {
        let table = table();
        let overrides = &table.get("SLOW").unwrap().config.status_map;
        assert_eq!(canonical_status(Some("LATE"), Some(overrides)), CurrentStatus::InTransit);
        assert_eq!(canonical_status(Some("canceled"), None), CurrentStatus::Canceled);
        assert_eq!(canonical_status(Some("3"), None), CurrentStatus::Canceled);
        assert_eq!(canonical_status(Some("7"), None), CurrentStatus::Canceled);
        assert_eq!(canonical_status(Some("deleted"), None), CurrentStatus::Canceled);
        assert_eq!(canonical_status(Some("STOPPED_AT"), None), CurrentStatus::StoppedAt);
        assert_eq!(canonical_status(Some("INCOMING_AT"), None), CurrentStatus::InTransit);
        assert_eq!(canonical_status(Some("SCHEDULED"), None), CurrentStatus::Scheduled);
        assert_eq!(canonical_status(Some("SKIPPED"), None), CurrentStatus::Unknown);
        assert_eq!(canonical_status(None, None), CurrentStatus::Unknown);
    }

    #[test]
    fn delays_convert_to_seconds() {
        let table = table();
        let snap = crate::schedule::ScheduleSnapshot::empty();
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("SLOW", "T1");
        r.arrival_delay = Some(3);
        r.departure_delay = Some(-1);
        let rec = n.normalize(&r, ingested()).unwrap();
        assert_eq!(rec.arrival_delay_seconds, Some(180));
        assert_eq!(rec.departure_delay_seconds, Some(-60));
    }

    #[test]
    fn absolute_times_are_kept() {
        let table = table();
        let snap = crate::schedule::ScheduleSnapshot::empty();
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("BART", "T1");
        r.departure_time = Some(1_704_470_580);
        r.arrival_time = Some(0);
        r.feed_timestamp = Some(1_704_470_000);
        let rec = n.normalize(&r, ingested()).unwrap();
        assert_eq!(
            rec.predicted_departure_time,
            DateTime::from_timestamp(1_704_470_580, 0)
        );
        assert_eq!(rec.predicted_arrival_time, None);
        assert_eq!(
            rec.last_update_timestamp_feed,
            DateTime::from_timestamp(1_704_470_000, 0)
        );
        assert_eq!(rec.ingestion_timestamp_utc, ingested());
    }

    #[test]
    fn derives_predicted_time_from_stop_time_and_offset() {
        let table = table();
        let snap = snapshot(
            "BART",
            AgencySchedule::new(
                vec![route("BART", "R1")],
                vec![],
                vec![trip("BART", "R1", "T1", 0)],
                vec![stop_time("T1", "RICH", 1, 8 * 3600), stop_time("T1", "MLBR", 2, 9 * 3600)],
            ),
        );
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("BART", "T1");
        r.stop_id = Some("RICH".into());
        r.departure_delay = Some(180);
        r.start_date = Some("20240105".into());
        let rec = n.normalize(&r, ingested()).unwrap();

        let local = rec
            .predicted_departure_time
            .unwrap()
            .with_timezone(&chrono_tz::America::Los_Angeles);
        assert_eq!((local.hour(), local.minute()), (8, 3));
        assert_eq!(rec.predicted_arrival_time, None);
    }

    #[test]
    fn derivation_uses_normalized_trip_id() {
        let table = table();
        let snap = snapshot(
            "DATED",
            AgencySchedule::new(
                vec![route("DATED", "R1")],
                vec![],
                vec![trip("DATED", "R1", "T7", 0)],
                vec![stop_time("T7", "A", 4, 10 * 3600)],
            ),
        );
        let n = Normalizer::new(&table, &snap);
        let mut r = raw("DATED", "T7_20240105");
        r.stop_sequence = Some(4);
        r.arrival_delay = Some(60);
        let rec = n.normalize(&r, ingested()).unwrap();
        assert_eq!(
            rec.predicted_arrival_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 10, 1, 0).unwrap())
        );
    }

    #[test]
    fn schedule_time_past_midnight_rolls_over() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let utc = schedule_time_to_utc(25 * 3600, date, Tz::UTC).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 1, 6, 1, 0, 0).unwrap());
    }
}
