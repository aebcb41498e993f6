use crate::analyzers::aggregate::aggregate_routes;
use crate::analyzers::diagnostics::{IngestDiagnostics, RunDiagnostics};
use crate::analyzers::score::score;
use crate::analyzers::types::MatchedRecord;
use crate::config::{Agency, AgencyTable};
use crate::error::{MalformedFeedError, PipelineError, StoreError};
use crate::normalizer::Normalizer;
use crate::reconciler::{Reconciler, Resolution};
use crate::records::{RawTripUpdate, TripUpdateRecord};
use crate::schedule::{ScheduleSnapshot, ScheduleStore};
use crate::store::{ResultsStore, TimeWindow, UpdateSink, UpdateSource};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one agency's portion of a run.
#[derive(Debug)]
pub struct AgencyRun {
    pub diagnostics: RunDiagnostics,
    pub error: Option<PipelineError>,
}

/// Per-agency outcomes of an analysis run, in agency label order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub agencies: Vec<AgencyRun>,
    /// Raw updates without an agency, which no agency can account for.
    pub unattributed_malformed: usize,
    /// Raw updates from agencies missing from the agency table.
    pub unconfigured: usize,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.agencies.iter().any(|run| run.error.is_some())
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &RunDiagnostics> {
        self.agencies.iter().map(|run| &run.diagnostics)
    }

    pub fn agency(&self, label: &str) -> Option<&AgencyRun> {
        self.agencies.iter().find(|run| run.diagnostics.agency == label)
    }
}

/// Runs normalization, reconciliation, aggregation and scoring against one
/// immutable schedule snapshot.
pub struct Pipeline<'a> {
    agencies: &'a AgencyTable,
    schedule: Arc<ScheduleSnapshot>,
}

impl<'a> Pipeline<'a> {
    pub fn new(agencies: &'a AgencyTable, schedule: Arc<ScheduleSnapshot>) -> Self {
        Self { agencies, schedule }
    }

    /// Normalizes raw updates and appends the valid ones to `sink`.
    /// Malformed updates are dropped, and their per-agency counts are
    /// recorded in `sink` so analysis runs can report them.
    pub fn ingest<K: UpdateSink + ?Sized>(
        &self,
        raw: &[RawTripUpdate],
        ingested_at: DateTime<Utc>,
        sink: &mut K,
    ) -> Result<IngestDiagnostics, StoreError> {
        let normalizer = Normalizer::new(self.agencies, self.schedule.as_ref());
        let mut diagnostics = IngestDiagnostics {
            fetched: raw.len(),
            ..Default::default()
        };

        let mut records = Vec::with_capacity(raw.len());
        let mut rejections: BTreeMap<String, usize> = BTreeMap::new();
        for update in raw {
            match normalizer.normalize(update, ingested_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed trip update");
                    diagnostics.dropped_malformed += 1;
                    if let MalformedFeedError::MissingTripId { agency } = e {
                        *rejections.entry(agency).or_default() += 1;
                    }
                }
            }
        }

        let outcome = sink.append_updates(&records)?;
        if !rejections.is_empty() {
            sink.record_rejections(ingested_at, &rejections)?;
        }
        diagnostics.appended = outcome.appended;
        diagnostics.duplicates = outcome.duplicates;
        Ok(diagnostics)
    }

    /// Analyzes records ingested within `window` for every configured
    /// agency, or only the agency whose label or static id is `only`.
    ///
    /// The window is read from `source` once, before any agency is
    /// processed, so appends committed during the run do not reach it.
    pub fn analyze<U, R>(
        &self,
        source: &U,
        results: &mut R,
        window: &TimeWindow,
        only: Option<&str>,
    ) -> RunReport
    where
        U: UpdateSource + ?Sized,
        R: ResultsStore + ?Sized,
    {
        let started_at = Utc::now();
        info!(start = %window.start, end = %window.end, "Starting analysis run");

        let mut contents = source.read_window(window).map_err(Arc::new);

        let mut report = RunReport::default();
        if let Ok(contents) = &contents {
            report.unconfigured = contents
                .updates
                .iter()
                .filter(|(label, _)| self.agencies.get(label).is_none())
                .map(|(_, records)| records.len())
                .sum();
        }

        for agency in self.agencies.iter() {
            if only.is_some_and(|id| id != agency.label() && id != agency.static_agency_id()) {
                continue;
            }
            let mut diagnostics = RunDiagnostics::new(agency.label(), started_at);

            let run = match &mut contents {
                Ok(contents) => {
                    let (records, malformed) = contents.take_agency(agency.label());
                    diagnostics.dropped_malformed = malformed;
                    self.process_agency(agency, records, diagnostics, results)
                }
                Err(err) => {
                    let error = PipelineError::StorageRead {
                        agency: agency.label().to_string(),
                        source: Arc::clone(err),
                    };
                    warn!(agency = agency.label(), error = %error, "Agency run failed");
                    diagnostics.set_error("StorageRead", &error);
                    AgencyRun {
                        diagnostics,
                        error: Some(error),
                    }
                }
            };
            report.agencies.push(run);
        }
        report
    }

    /// Runs the whole flow on an in-memory batch, bypassing the ingestion
    /// sink. Every configured agency appearing in the batch has its rows
    /// replaced.
    pub fn run_batch<R: ResultsStore + ?Sized>(
        &self,
        raw: &[RawTripUpdate],
        ingested_at: DateTime<Utc>,
        results: &mut R,
    ) -> RunReport {
        let normalizer = Normalizer::new(self.agencies, self.schedule.as_ref());
        let mut report = RunReport::default();

        // label -> (records, malformed count)
        let mut by_agency: BTreeMap<&str, (Vec<TripUpdateRecord>, usize)> = BTreeMap::new();
        for update in raw {
            let Some(agency) = update
                .agency
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
            else {
                report.unattributed_malformed += 1;
                continue;
            };
            let Some(configured) = self.agencies.get(agency) else {
                report.unconfigured += 1;
                continue;
            };
            let entry = by_agency.entry(configured.label()).or_default();
            match normalizer.normalize(update, ingested_at) {
                Ok(record) => entry.0.push(record),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed trip update");
                    entry.1 += 1;
                }
            }
        }

        if report.unconfigured > 0 {
            warn!(count = report.unconfigured, "Skipped updates from unconfigured agencies");
        }

        for (label, (records, malformed)) in by_agency {
            let Some(agency) = self.agencies.get(label) else {
                continue;
            };
            let mut diagnostics = RunDiagnostics::new(label, ingested_at);
            diagnostics.dropped_malformed = malformed;
            report
                .agencies
                .push(self.process_agency(agency, records, diagnostics, results));
        }
        report
    }

    #[tracing::instrument(
        skip_all,
        fields(agency = agency.label(), agency_id = agency.static_agency_id())
    )]
    fn process_agency<R: ResultsStore + ?Sized>(
        &self,
        agency: &Agency,
        records: Vec<TripUpdateRecord>,
        mut diagnostics: RunDiagnostics,
        results: &mut R,
    ) -> AgencyRun {
        let schedule = self.schedule.as_ref();
        let agency_id = agency.static_agency_id();
        diagnostics.processed = records.len();

        if !schedule.has_schedule(agency_id) {
            let error = PipelineError::StaticScheduleStale {
                agency_id: agency_id.to_string(),
            };
            warn!(error = %error, "Agency run failed");
            diagnostics.set_error("StaticScheduleStale", &error);
            return AgencyRun {
                diagnostics,
                error: Some(error),
            };
        }

        let records = drop_stale(records, agency.config.stale_after_secs, &mut diagnostics);

        let reconciler = Reconciler::new(schedule);
        let mut matched = Vec::with_capacity(records.len());
        for record in &records {
            match reconciler.resolve(agency, record) {
                Resolution::Matched { kind, trip } => {
                    if schedule.route(&trip.agency_id, &trip.route_id).is_none() {
                        diagnostics.unknown_route += 1;
                        continue;
                    }
                    diagnostics.record_match(kind);
                    matched.push(MatchedRecord { record, kind, trip });
                }
                Resolution::Unmatched => diagnostics.unmatched += 1,
            }
        }

        let aggregates = aggregate_routes(matched);
        let rows = score(&aggregates, schedule);

        if let Err(source) = results.replace_agency(agency_id, &rows) {
            let error = PipelineError::StorageWrite {
                agency_id: agency_id.to_string(),
                source,
            };
            warn!(error = %error, "Agency run failed");
            diagnostics.set_error("StorageWrite", &error);
            return AgencyRun {
                diagnostics,
                error: Some(error),
            };
        }
        diagnostics.routes_written = rows.len();

        info!(
            processed = diagnostics.processed,
            dropped_malformed = diagnostics.dropped_malformed,
            dropped_stale = diagnostics.dropped_stale,
            exact = diagnostics.exact,
            normalized = diagnostics.normalized,
            fallback_window = diagnostics.fallback_window,
            unmatched = diagnostics.unmatched,
            unknown_route = diagnostics.unknown_route,
            routes_written = diagnostics.routes_written,
            match_rate = diagnostics.match_rate().unwrap_or(0.0),
            "Agency run complete"
        );

        AgencyRun {
            diagnostics,
            error: None,
        }
    }
}

/// Drops records whose provider timestamp lags ingestion by more than
/// `stale_after_secs`. Records without a provider timestamp are kept.
fn drop_stale(
    records: Vec<TripUpdateRecord>,
    stale_after_secs: Option<u64>,
    diagnostics: &mut RunDiagnostics,
) -> Vec<TripUpdateRecord> {
    let Some(limit) = stale_after_secs.and_then(|s| i64::try_from(s).ok()) else {
        return records;
    };
    let limit = Duration::seconds(limit);
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| {
            r.last_update_timestamp_feed
                .is_none_or(|feed_ts| r.ingestion_timestamp_utc - feed_ts <= limit)
        })
        .collect();
    diagnostics.dropped_stale = before - kept.len();
    kept
}
