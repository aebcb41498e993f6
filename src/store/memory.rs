use super::{AppendOutcome, ResultsStore, TimeWindow, UpdateSink, UpdateSource, WindowContents};
use crate::analyzers::types::OnTimePerformance;
use crate::error::StoreResult;
use crate::records::TripUpdateRecord;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

type UpdateKey = (DateTime<Utc>, String, String);

/// In-process store keeping raw updates and results in ordered maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    updates: BTreeMap<UpdateKey, TripUpdateRecord>,
    rejections: BTreeMap<(DateTime<Utc>, String), usize>,
    results: BTreeMap<(String, String), OnTimePerformance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdateSource for MemoryStore {
    fn read_window(&self, window: &TimeWindow) -> StoreResult<WindowContents> {
        // Key order is (ingestion time, agency, trip id), so each agency's
        // records come out ordered by ingestion time then trip id.
        let mut contents = WindowContents::default();
        for record in self
            .updates
            .range((window.start, String::new(), String::new())..)
            .take_while(|((ts, _, _), _)| *ts < window.end)
            .map(|(_, r)| r)
        {
            contents
                .updates
                .entry(record.agency.clone())
                .or_default()
                .push(record.clone());
        }
        for ((ts, agency), count) in &self.rejections {
            if window.contains(*ts) {
                *contents.rejections.entry(agency.clone()).or_default() += count;
            }
        }
        Ok(contents)
    }
}

impl UpdateSink for MemoryStore {
    fn append_updates(&mut self, records: &[TripUpdateRecord]) -> StoreResult<AppendOutcome> {
        let mut outcome = AppendOutcome::default();
        for record in records {
            let key = (
                record.ingestion_timestamp_utc,
                record.agency.clone(),
                record.trip_id.clone(),
            );
            if self.updates.contains_key(&key) {
                outcome.duplicates += 1;
            } else {
                self.updates.insert(key, record.clone());
                outcome.appended += 1;
            }
        }
        Ok(outcome)
    }

    fn record_rejections(
        &mut self,
        ingested_at: DateTime<Utc>,
        counts: &BTreeMap<String, usize>,
    ) -> StoreResult<()> {
        for (agency, count) in counts {
            *self
                .rejections
                .entry((ingested_at, agency.clone()))
                .or_default() += count;
        }
        Ok(())
    }
}

impl ResultsStore for MemoryStore {
    fn replace_agency(&mut self, agency_id: &str, rows: &[OnTimePerformance]) -> StoreResult<()> {
        self.results.retain(|(agency, _), _| agency != agency_id);
        for row in rows {
            self.results
                .insert((row.agency_id.clone(), row.route_id.clone()), row.clone());
        }
        Ok(())
    }

    fn performance(&self, agency_id: Option<&str>) -> StoreResult<Vec<OnTimePerformance>> {
        Ok(self
            .results
            .iter()
            .filter(|((agency, _), _)| agency_id.is_none_or(|id| agency == id))
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{at, record, row};

    #[test]
    fn duplicate_keys_are_ignored() {
        let mut store = MemoryStore::new();
        let first = record("BART", "T1", at(8, 0));
        let mut again = first.clone();
        again.arrival_delay_seconds = Some(999);

        let out = store.append_updates(&[first.clone(), again]).unwrap();
        assert_eq!(out, AppendOutcome { appended: 1, duplicates: 1 });

        let window = TimeWindow::new(at(0, 0), at(23, 0));
        let mut contents = store.read_window(&window).unwrap();
        assert_eq!(contents.take_agency("BART"), (vec![first], 0));
    }

    #[test]
    fn read_filters_by_agency_and_window() {
        let mut store = MemoryStore::new();
        store
            .append_updates(&[
                record("BART", "T2", at(8, 30)),
                record("BART", "T1", at(8, 30)),
                record("MTA", "T1", at(8, 30)),
                record("BART", "T3", at(9, 0)),
                record("BART", "T0", at(7, 59)),
            ])
            .unwrap();

        store
            .record_rejections(at(8, 30), &BTreeMap::from([("BART".to_string(), 2)]))
            .unwrap();
        store
            .record_rejections(at(9, 0), &BTreeMap::from([("BART".to_string(), 7)]))
            .unwrap();

        let window = TimeWindow::new(at(8, 0), at(9, 0));
        let mut contents = store.read_window(&window).unwrap();
        let (bart, rejected) = contents.take_agency("BART");
        let ids: Vec<String> = bart.into_iter().map(|r| r.trip_id).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(rejected, 2);
        assert_eq!(contents.take_agency("MTA").0.len(), 1);
    }

    #[test]
    fn replace_agency_drops_missing_routes() {
        let mut store = MemoryStore::new();
        store
            .replace_agency("BART_SF", &[row("BART_SF", "R1", Some(1.0)), row("BART_SF", "R2", None)])
            .unwrap();
        store.replace_agency("MTA_NYC", &[row("MTA_NYC", "1", Some(2.0))]).unwrap();
        store.replace_agency("BART_SF", &[row("BART_SF", "R2", Some(3.0))]).unwrap();

        let bart = store.performance(Some("BART_SF")).unwrap();
        assert_eq!(bart, vec![row("BART_SF", "R2", Some(3.0))]);
        assert_eq!(store.performance(None).unwrap().len(), 2);
    }
}
