//! SQLite persistence for raw updates and on-time performance.
//!
//! Timestamps are stored as RFC 3339 UTC text with microsecond precision,
//! so lexical order equals chronological order.

use super::{AppendOutcome, ResultsStore, TimeWindow, UpdateSink, UpdateSource, WindowContents};
use crate::analyzers::types::OnTimePerformance;
use crate::error::{StoreError, StoreResult};
use crate::records::{CurrentStatus, TripUpdateRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, Row, params};
use std::collections::BTreeMap;
use tracing::debug;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        // Ingestion may append while an analysis run reads.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> StoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_initial.sql"))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("timestamp '{text}': {e}")))
}

fn decode_opt_ts(text: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    text.as_deref().map(decode_ts).transpose()
}

/// Column values of one `real_time_trip_updates` row before decoding.
struct UpdateRow {
    ingestion_timestamp_utc: String,
    agency: String,
    line_group: Option<String>,
    trip_id: String,
    route_id: Option<String>,
    direction_id: Option<u32>,
    start_date: Option<String>,
    current_status: String,
    stop_id: Option<String>,
    stop_sequence: Option<u32>,
    arrival_delay_seconds: Option<i64>,
    departure_delay_seconds: Option<i64>,
    predicted_arrival_time: Option<String>,
    predicted_departure_time: Option<String>,
    last_update_timestamp_feed: Option<String>,
}

impl UpdateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ingestion_timestamp_utc: row.get(0)?,
            agency: row.get(1)?,
            line_group: row.get(2)?,
            trip_id: row.get(3)?,
            route_id: row.get(4)?,
            direction_id: row.get(5)?,
            start_date: row.get(6)?,
            current_status: row.get(7)?,
            stop_id: row.get(8)?,
            stop_sequence: row.get(9)?,
            arrival_delay_seconds: row.get(10)?,
            departure_delay_seconds: row.get(11)?,
            predicted_arrival_time: row.get(12)?,
            predicted_departure_time: row.get(13)?,
            last_update_timestamp_feed: row.get(14)?,
        })
    }

    fn decode(self) -> StoreResult<TripUpdateRecord> {
        let current_status = self
            .current_status
            .parse::<CurrentStatus>()
            .map_err(StoreError::Decode)?;
        Ok(TripUpdateRecord {
            ingestion_timestamp_utc: decode_ts(&self.ingestion_timestamp_utc)?,
            agency: self.agency,
            line_group: self.line_group,
            trip_id: self.trip_id,
            route_id: self.route_id,
            direction_id: self.direction_id,
            start_date: self.start_date,
            current_status,
            stop_id: self.stop_id,
            stop_sequence: self.stop_sequence,
            arrival_delay_seconds: self.arrival_delay_seconds,
            departure_delay_seconds: self.departure_delay_seconds,
            predicted_arrival_time: decode_opt_ts(self.predicted_arrival_time)?,
            predicted_departure_time: decode_opt_ts(self.predicted_departure_time)?,
            last_update_timestamp_feed: decode_opt_ts(self.last_update_timestamp_feed)?,
        })
    }
}

impl UpdateSource for SqliteStore {
    fn read_window(&self, window: &TimeWindow) -> StoreResult<WindowContents> {
        // Both reads share one transaction, so in WAL mode they see the
        // same snapshot regardless of concurrent appends.
        let tx = self.conn.unchecked_transaction()?;
        let start = encode_ts(window.start);
        let end = encode_ts(window.end);

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT ingestion_timestamp_utc, agency, line_group, trip_id, route_id,
                        direction_id, start_date, current_status, stop_id, stop_sequence,
                        arrival_delay_seconds, departure_delay_seconds,
                        predicted_arrival_time, predicted_departure_time,
                        last_update_timestamp_feed
                 FROM real_time_trip_updates
                 WHERE ingestion_timestamp_utc >= ?1
                   AND ingestion_timestamp_utc < ?2
                 ORDER BY agency ASC, ingestion_timestamp_utc ASC, trip_id ASC",
            )?;
            stmt.query_map(params![start, end], UpdateRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?
        };

        let rejections = {
            let mut stmt = tx.prepare(
                "SELECT agency, SUM(rejected)
                 FROM trip_update_rejections
                 WHERE ingestion_timestamp_utc >= ?1
                   AND ingestion_timestamp_utc < ?2
                 GROUP BY agency",
            )?;
            stmt.query_map(params![start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        let mut contents = WindowContents::default();
        for row in rows {
            let record = row.decode()?;
            contents
                .updates
                .entry(record.agency.clone())
                .or_default()
                .push(record);
        }
        for (agency, rejected) in rejections {
            contents
                .rejections
                .insert(agency, usize::try_from(rejected).unwrap_or_default());
        }
        Ok(contents)
    }
}

impl UpdateSink for SqliteStore {
    fn append_updates(&mut self, records: &[TripUpdateRecord]) -> StoreResult<AppendOutcome> {
        let tx = self.conn.transaction()?;
        let mut outcome = AppendOutcome::default();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO real_time_trip_updates
                 (ingestion_timestamp_utc, agency, line_group, trip_id, route_id,
                  direction_id, start_date, current_status, stop_id, stop_sequence,
                  arrival_delay_seconds, departure_delay_seconds,
                  predicted_arrival_time, predicted_departure_time,
                  last_update_timestamp_feed)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            )?;
            for r in records {
                let inserted = stmt.execute(params![
                    encode_ts(r.ingestion_timestamp_utc),
                    r.agency,
                    r.line_group,
                    r.trip_id,
                    r.route_id,
                    r.direction_id,
                    r.start_date,
                    r.current_status.as_str(),
                    r.stop_id,
                    r.stop_sequence,
                    r.arrival_delay_seconds,
                    r.departure_delay_seconds,
                    r.predicted_arrival_time.map(encode_ts),
                    r.predicted_departure_time.map(encode_ts),
                    r.last_update_timestamp_feed.map(encode_ts),
                ])?;
                if inserted == 0 {
                    outcome.duplicates += 1;
                } else {
                    outcome.appended += 1;
                }
            }
        }
        tx.commit()?;
        debug!(
            appended = outcome.appended,
            duplicates = outcome.duplicates,
            "Appended trip updates"
        );
        Ok(outcome)
    }

    fn record_rejections(
        &mut self,
        ingested_at: DateTime<Utc>,
        counts: &BTreeMap<String, usize>,
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO trip_update_rejections (ingestion_timestamp_utc, agency, rejected)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (ingestion_timestamp_utc, agency)
                 DO UPDATE SET rejected = rejected + excluded.rejected",
            )?;
            let ts = encode_ts(ingested_at);
            for (agency, count) in counts {
                stmt.execute(params![ts, agency, *count as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl ResultsStore for SqliteStore {
    fn replace_agency(&mut self, agency_id: &str, rows: &[OnTimePerformance]) -> StoreResult<()> {
        // Dropping the transaction without commit rolls it back.
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM on_time_performance WHERE agency_id = ?1",
            params![agency_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO on_time_performance
                 (agency_id, route_id, route_short_name, route_long_name,
                  average_delay_minutes, total_trips, delayed_trips)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.agency_id,
                    row.route_id,
                    row.route_short_name,
                    row.route_long_name,
                    row.average_delay_minutes,
                    row.total_trips as i64,
                    row.delayed_trips as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn performance(&self, agency_id: Option<&str>) -> StoreResult<Vec<OnTimePerformance>> {
        let mut stmt = self.conn.prepare(
            "SELECT agency_id, route_id, route_short_name, route_long_name,
                    average_delay_minutes, total_trips, delayed_trips
             FROM on_time_performance
             WHERE ?1 IS NULL OR agency_id = ?1
             ORDER BY agency_id ASC, route_id ASC",
        )?;
        let rows = stmt
            .query_map(params![agency_id], |row| {
                Ok(OnTimePerformance {
                    agency_id: row.get(0)?,
                    route_id: row.get(1)?,
                    route_short_name: row.get(2)?,
                    route_long_name: row.get(3)?,
                    average_delay_minutes: row.get(4)?,
                    total_trips: row.get::<_, i64>(5)? as u64,
                    delayed_trips: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
