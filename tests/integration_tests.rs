use chrono::{DateTime, Duration, TimeZone, Utc};
use prost::Message;
use std::path::PathBuf;
use std::sync::Arc;
use transit_otp::analyzers::Pipeline;
use transit_otp::config::{AgencyConfig, AgencyTable, FeedAuth, Settings};
use transit_otp::error::PipelineError;
use transit_otp::feed::{extract_trip_updates, parse_feed};
use transit_otp::gtfs_rt::trip_update::{StopTimeEvent, StopTimeUpdate};
use transit_otp::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate};
use transit_otp::reconciler::strategy::{Fallback, MatchingStrategy};
use transit_otp::records::RawTripUpdate;
use transit_otp::schedule::loader::load_snapshot;
use transit_otp::store::{
    MemoryStore, ResultsStore, SqliteStore, TimeWindow, UpdateSource,
};

const MTA_STATIC_TRIP: &str = "AFA23GEN-1037-Weekday-00_048600_1..N03R";

fn fixture_dir(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .display()
        .to_string()
}

fn agencies() -> AgencyTable {
    let mut bart = AgencyConfig::new("BART");
    bart.static_agency_id = Some("BART_SF".into());
    bart.timezone = "America/Los_Angeles".into();
    bart.static_dir = Some(fixture_dir("bart"));
    bart.matching = MatchingStrategy::with_window(600);

    let mut mta = AgencyConfig::new("MTA");
    mta.static_agency_id = Some("MTA_NYC".into());
    mta.timezone = "America/New_York".into();
    mta.static_dir = Some(fixture_dir("mta"));
    mta.matching = MatchingStrategy::exact_only();

    let mut vta = AgencyConfig::new("VTA");
    vta.timezone = "America/Los_Angeles".into();
    vta.static_dir = Some(fixture_dir("does-not-exist"));

    AgencyTable::from_configs(vec![bart, mta, vta]).unwrap()
}

/// 2024-01-05 08:05 in San Francisco.
fn ingested() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 16, 5, 0).unwrap()
}

fn raw(agency: &str, trip_id: &str, route_id: &str) -> RawTripUpdate {
    RawTripUpdate {
        agency: Some(agency.into()),
        trip_id: Some(trip_id.into()),
        route_id: Some(route_id.into()),
        direction_id: Some(0),
        start_date: Some("20240105".into()),
        status: Some("IN_TRANSIT_TO".into()),
        ..Default::default()
    }
}

fn sqlite() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

#[test]
fn test_exact_match_contributes_its_delay() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = MemoryStore::new();

    let mut update = raw("BART", "T1", "YL");
    update.stop_sequence = Some(1);
    update.departure_time = Some(Utc.with_ymd_and_hms(2024, 1, 5, 16, 3, 0).unwrap().timestamp());
    update.arrival_delay = Some(180);

    let report = pipeline.run_batch(&[update], ingested(), &mut store);
    let bart = report.agency("BART").unwrap();
    assert!(bart.error.is_none());
    assert_eq!(bart.diagnostics.exact, 1);

    let rows = store.performance(Some("BART_SF")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].route_id, "YL");
    assert_eq!(rows[0].route_short_name.as_deref(), Some("Yellow-N"));
    assert_eq!(rows[0].average_delay_minutes, Some(3.0));
    assert_eq!(rows[0].total_trips, 1);
}

#[test]
fn test_exact_only_agency_leaves_mismatched_id_unmatched() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = MemoryStore::new();

    // A scheduled trip departs at exactly this time, but MTA does not
    // fall back to the departure window.
    let mut update = raw("MTA", "086550_1..N03R", "1");
    update.departure_time = Some(Utc.with_ymd_and_hms(2024, 1, 5, 13, 10, 0).unwrap().timestamp());
    update.arrival_delay = Some(60);

    let report = pipeline.run_batch(&[update], ingested(), &mut store);
    let mta = report.agency("MTA").unwrap();
    assert!(mta.error.is_none());
    assert_eq!(mta.diagnostics.unmatched, 1);
    assert_eq!(mta.diagnostics.matched(), 0);
    assert!(store.performance(Some("MTA_NYC")).unwrap().is_empty());
}

#[test]
fn test_fallback_window_picks_closest_departure() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = MemoryStore::new();

    let mut update = raw("BART", "rt-0827", "YL");
    update.departure_time = Some(Utc.with_ymd_and_hms(2024, 1, 5, 16, 27, 0).unwrap().timestamp());
    update.arrival_delay = Some(120);

    let report = pipeline.run_batch(&[update], ingested(), &mut store);
    assert_eq!(report.agency("BART").unwrap().diagnostics.fallback_window, 1);

    let rows = store.performance(Some("BART_SF")).unwrap();
    assert_eq!(rows[0].total_trips, 1);
    assert_eq!(rows[0].average_delay_minutes, Some(2.0));
}

#[test]
fn test_latest_ingestion_represents_trip() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = sqlite();

    let mut first = raw("BART", "T1", "YL");
    first.arrival_delay = Some(60);
    let mut second = first.clone();
    second.arrival_delay = Some(300);

    pipeline.ingest(&[first], ingested(), &mut store).unwrap();
    pipeline
        .ingest(&[second], ingested() + Duration::minutes(1), &mut store)
        .unwrap();

    let window = TimeWindow::ending_at(ingested() + Duration::minutes(5), Duration::hours(1));
    let mut results = sqlite();
    let report = pipeline.analyze(&store, &mut results, &window, Some("BART"));

    let bart = report.agency("BART").unwrap();
    assert_eq!(bart.diagnostics.processed, 2);
    assert_eq!(bart.diagnostics.exact, 2);

    let rows = results.performance(Some("BART_SF")).unwrap();
    assert_eq!(rows[0].total_trips, 1);
    assert_eq!(rows[0].average_delay_minutes, Some(5.0));
}

#[test]
fn test_rerun_produces_identical_rows() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));

    let mut batch = Vec::new();
    for (trip, delay) in [("T1", 70), ("T2", -20), ("T3", 45), ("T1", 95)] {
        let mut update = raw("BART", trip, "YL");
        update.arrival_delay = Some(delay);
        batch.push(update);
    }
    let mut mta = raw("MTA", MTA_STATIC_TRIP, "1");
    mta.arrival_delay = Some(33);
    batch.push(mta);

    let mut store = sqlite();
    pipeline.run_batch(&batch, ingested(), &mut store);
    let first = serde_json::to_string(&store.performance(None).unwrap()).unwrap();

    batch.reverse();
    pipeline.run_batch(&batch, ingested(), &mut store);
    let second = serde_json::to_string(&store.performance(None).unwrap()).unwrap();

    assert_eq!(first, second);
    assert!(first.contains("\"MTA_NYC\""));
}

#[test]
fn test_storage_failure_keeps_previous_rows_of_that_agency_only() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = sqlite();

    let mut seed = raw("BART", "T1", "YL");
    seed.arrival_delay = Some(600);
    pipeline.run_batch(&[seed], ingested(), &mut store);
    let before = store.performance(Some("BART_SF")).unwrap();
    assert_eq!(before.len(), 1);

    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER reject_bart BEFORE INSERT ON on_time_performance
             WHEN NEW.agency_id = 'BART_SF'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let mut bart = raw("BART", "T2", "YL");
    bart.arrival_delay = Some(60);
    let mut mta = raw("MTA", MTA_STATIC_TRIP, "1");
    mta.arrival_delay = Some(120);

    let report = pipeline.run_batch(&[bart, mta], ingested(), &mut store);
    assert!(report.has_failures());
    assert!(matches!(
        report.agency("BART").unwrap().error,
        Some(PipelineError::StorageWrite { .. })
    ));
    assert!(report.agency("MTA").unwrap().error.is_none());

    assert_eq!(store.performance(Some("BART_SF")).unwrap(), before);
    let mta_rows = store.performance(Some("MTA_NYC")).unwrap();
    assert_eq!(mta_rows.len(), 1);
    assert_eq!(mta_rows[0].average_delay_minutes, Some(2.0));
}

#[test]
fn test_missing_schedule_fails_only_that_agency() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = MemoryStore::new();

    let mut bart = raw("BART", "T3", "YL");
    bart.direction_id = Some(1);
    bart.arrival_delay = Some(-90);

    let report = pipeline.run_batch(&[raw("VTA", "V1", "22"), bart], ingested(), &mut store);

    assert!(matches!(
        report.agency("VTA").unwrap().error,
        Some(PipelineError::StaticScheduleStale { .. })
    ));
    let rows = store.performance(Some("BART_SF")).unwrap();
    assert_eq!(rows[0].average_delay_minutes, Some(-1.5));
}

#[test]
fn test_feed_to_results_through_sqlite() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = sqlite();

    let feed = FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: Some(ingested().timestamp() as u64 - 20),
            feed_version: None,
        },
        entity: vec![FeedEntity {
            id: "1".to_string(),
            is_deleted: None,
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some("T1".to_string()),
                    route_id: Some("YL".to_string()),
                    direction_id: Some(0),
                    start_time: None,
                    start_date: Some("20240105".to_string()),
                    schedule_relationship: None,
                },
                vehicle: None,
                stop_time_update: vec![StopTimeUpdate {
                    stop_sequence: Some(2),
                    stop_id: Some("PITT".to_string()),
                    arrival: Some(StopTimeEvent {
                        delay: Some(240),
                        time: None,
                        uncertainty: None,
                        scheduled_time: None,
                    }),
                    departure: None,
                    schedule_relationship: None,
                }],
                timestamp: None,
                delay: None,
            }),
            vehicle: None,
        }],
    };

    let decoded = parse_feed(&feed.encode_to_vec()).unwrap();
    let updates = extract_trip_updates(&decoded, "BART", None);
    let ingest = pipeline.ingest(&updates, ingested(), &mut store).unwrap();
    assert_eq!(ingest.appended, 1);

    let window = TimeWindow::new(ingested(), ingested() + Duration::seconds(1));
    let stored = store.read_window(&window).unwrap().take_agency("BART").0;
    assert_eq!(
        stored[0].predicted_arrival_time,
        Some(Utc.with_ymd_and_hms(2024, 1, 5, 16, 14, 0).unwrap())
    );
    assert_eq!(stored[0].last_update_timestamp_feed, Some(ingested() - Duration::seconds(20)));

    let mut results = sqlite();
    let report = pipeline.analyze(&store, &mut results, &window, Some("BART_SF"));
    assert!(!report.has_failures());
    assert_eq!(
        results.performance(None).unwrap()[0].average_delay_minutes,
        Some(4.0)
    );
}

#[test]
fn test_malformed_updates_are_reported_by_later_analysis() {
    let table = agencies();
    let pipeline = Pipeline::new(&table, Arc::new(load_snapshot(&table)));
    let mut store = sqlite();

    let mut good = raw("BART", "T1", "YL");
    good.arrival_delay = Some(120);
    let mut no_trip = raw("BART", "T2", "YL");
    no_trip.trip_id = Some("  ".into());
    let mut mta_no_trip = raw("MTA", MTA_STATIC_TRIP, "1");
    mta_no_trip.trip_id = None;

    let ingest = pipeline
        .ingest(&[good, no_trip, mta_no_trip], ingested(), &mut store)
        .unwrap();
    assert_eq!(ingest.appended, 1);
    assert_eq!(ingest.dropped_malformed, 2);

    let window = TimeWindow::ending_at(ingested() + Duration::seconds(1), Duration::hours(1));
    let mut results = sqlite();
    let report = pipeline.analyze(&store, &mut results, &window, None);

    let bart = &report.agency("BART").unwrap().diagnostics;
    assert_eq!(bart.processed, 1);
    assert_eq!(bart.dropped_malformed, 1);
    assert_eq!(report.agency("MTA").unwrap().diagnostics.dropped_malformed, 1);

    // Outside the window the rejections are not counted.
    let later = TimeWindow::ending_at(ingested() + Duration::hours(3), Duration::hours(1));
    let report = pipeline.analyze(&store, &mut results, &later, Some("BART"));
    assert_eq!(report.agencies[0].diagnostics.dropped_malformed, 0);
}

#[test]
fn test_shipped_config_loads() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/agencies.json");
    let settings = Settings::load(&path.display().to_string()).unwrap();
    let table = AgencyTable::try_from(settings).unwrap();

    let mta = table.get("MTA").unwrap();
    assert_eq!(mta.static_agency_id(), "MTA_NYC");
    assert_eq!(mta.config.static_prefix.as_deref(), Some("mta_nyc_data"));
    assert_eq!(mta.strategy().fallback, Fallback::Disabled);
    assert!(mta.config.feeds.iter().all(|f| matches!(
        &f.auth,
        FeedAuth::Header { header_name, .. } if header_name == "x-api-key"
    )));

    let bart = table.get("BART").unwrap();
    assert_eq!(bart.static_agency_id(), "BART_SF");
    assert_eq!(bart.strategy().fallback, Fallback::Window { tolerance_secs: 600 });
}
