//! Loads static GTFS, from an extracted directory or straight from the
//! published `.zip` archive, into an [`AgencySchedule`].

use crate::config::AgencyTable;
use crate::schedule::snapshot::{AgencySchedule, ScheduleSnapshot};
use crate::schedule::types::{Route, StaticTrip, Stop, StopTime, parse_gtfs_time};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
    #[serde(default)]
    route_type: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    service_id: String,
    trip_id: String,
    #[serde(default)]
    trip_headsign: Option<String>,
    #[serde(default)]
    direction_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
    stop_id: String,
    stop_sequence: u32,
}

/// Where an agency's GTFS text files are read from.
enum GtfsSource {
    Dir(PathBuf),
    Archive {
        path: PathBuf,
        archive: ZipArchive<File>,
        /// Entry name prefix, empty or ending in `/`.
        prefix: String,
    },
}

impl GtfsSource {
    fn open(path: &Path, prefix: Option<&str>) -> Result<Self> {
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Ok(Self::Dir(path.to_path_buf()));
        }

        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let archive = ZipArchive::new(file)
            .with_context(|| format!("Not a valid zip archive: {}", path.display()))?;
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}/"))
            .unwrap_or_default();
        Ok(Self::Archive {
            path: path.to_path_buf(),
            archive,
            prefix,
        })
    }

    /// Reads every row of `file_name`. A missing file yields no rows.
    fn read_rows<T: DeserializeOwned>(&mut self, file_name: &str) -> Result<Vec<T>> {
        match self {
            Self::Dir(dir) => {
                let path = dir.join(file_name);
                if !path.exists() {
                    warn!(path = %path.display(), "GTFS file not found, skipping");
                    return Ok(Vec::new());
                }
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                deserialize_rows(file, &path.display().to_string())
            }
            Self::Archive {
                path,
                archive,
                prefix,
            } => {
                let name = format!("{prefix}{file_name}");
                let origin = format!("{}:{name}", path.display());
                let entry = match archive.by_name(&name) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => {
                        warn!(entry = %origin, "GTFS file not found, skipping");
                        return Ok(Vec::new());
                    }
                    Err(e) => return Err(e).with_context(|| format!("Failed to read {origin}")),
                };
                deserialize_rows(entry, &origin)
            }
        }
    }
}

fn deserialize_rows<T: DeserializeOwned, R: Read>(reader: R, origin: &str) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.with_context(|| format!("Bad row in {origin}"))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Loads `routes.txt`, `stops.txt`, `trips.txt` and `stop_times.txt` from
/// `path`, tagging every row with `agency_id`.
///
/// `path` is an extracted directory, or a `.zip` archive whose files sit
/// under `prefix` (the archive root when `None`).
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub fn load_agency(agency_id: &str, path: &Path, prefix: Option<&str>) -> Result<AgencySchedule> {
    let mut source = GtfsSource::open(path, prefix)?;

    let routes = source
        .read_rows::<RouteRow>("routes.txt")?
        .into_iter()
        .map(|r| Route {
            agency_id: agency_id.to_string(),
            route_id: r.route_id,
            route_short_name: r.route_short_name.filter(|s| !s.is_empty()),
            route_long_name: r.route_long_name.filter(|s| !s.is_empty()),
            route_type: r.route_type,
        })
        .collect();

    let stops = source
        .read_rows::<StopRow>("stops.txt")?
        .into_iter()
        .map(|s| Stop {
            agency_id: agency_id.to_string(),
            stop_id: s.stop_id,
            stop_name: s.stop_name,
            stop_lat: s.stop_lat,
            stop_lon: s.stop_lon,
        })
        .collect();

    let trips = source
        .read_rows::<TripRow>("trips.txt")?
        .into_iter()
        .map(|t| StaticTrip {
            agency_id: agency_id.to_string(),
            route_id: t.route_id,
            service_id: t.service_id,
            trip_id: t.trip_id,
            headsign: t.trip_headsign.filter(|s| !s.is_empty()),
            direction_id: t.direction_id,
        })
        .collect();

    let stop_times = source
        .read_rows::<StopTimeRow>("stop_times.txt")?
        .into_iter()
        .map(|st| StopTime {
            trip_id: st.trip_id,
            stop_id: st.stop_id,
            stop_sequence: st.stop_sequence,
            arrival_time: st.arrival_time.as_deref().and_then(parse_gtfs_time),
            departure_time: st.departure_time.as_deref().and_then(parse_gtfs_time),
        })
        .collect();

    let schedule = AgencySchedule::new(routes, stops, trips, stop_times);
    info!(
        agency_id,
        routes = schedule.route_count(),
        trips = schedule.trip_count(),
        "Static schedule loaded"
    );
    Ok(schedule)
}

/// Builds a fresh snapshot for every configured agency with a `static_dir`.
///
/// An agency whose schedule fails to load is left out of the snapshot and
/// logged; analysis then reports its schedule as stale.
pub fn load_snapshot(table: &AgencyTable) -> ScheduleSnapshot {
    let mut agencies = HashMap::new();

    for agency in table.iter() {
        let Some(dir) = agency.config.static_dir.as_deref() else {
            warn!(agency = agency.label(), "No static_dir configured");
            continue;
        };
        let agency_id = agency.static_agency_id();
        let prefix = agency.config.static_prefix.as_deref();
        match load_agency(agency_id, Path::new(dir), prefix) {
            Ok(schedule) => {
                agencies.insert(agency_id.to_string(), schedule);
            }
            Err(e) => {
                warn!(agency_id, error = %e, "Failed to load static schedule");
            }
        }
    }

    ScheduleSnapshot::new(agencies, Utc::now())
}
