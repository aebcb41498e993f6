//! Static schedule reference data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub agency_id: String,
    pub route_id: String,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_type: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub agency_id: String,
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticTrip {
    pub agency_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    pub headsign: Option<String>,
    pub direction_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    /// Seconds since service-day midnight; may exceed 86400.
    pub arrival_time: Option<u32>,
    /// Seconds since service-day midnight; may exceed 86400.
    pub departure_time: Option<u32>,
}

impl StopTime {
    pub fn departure_or_arrival(&self) -> Option<u32> {
        self.departure_time.or(self.arrival_time)
    }

    pub fn arrival_or_departure(&self) -> Option<u32> {
        self.arrival_time.or(self.departure_time)
    }
}

/// Parse GTFS time `HH:MM:SS` to seconds since midnight.
/// Hours past 23 are kept for trips crossing midnight.
pub fn parse_gtfs_time(time_str: &str) -> Option<u32> {
    let mut parts = time_str.trim().split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Parse a GTFS service date `YYYYMMDD`.
pub fn parse_service_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gtfs_time() {
        assert_eq!(parse_gtfs_time("08:00:00"), Some(28_800));
        assert_eq!(parse_gtfs_time(" 8:03:30"), Some(29_010));
        assert_eq!(parse_gtfs_time("25:10:00"), Some(90_600));
    }

    #[test]
    fn test_parse_gtfs_time_rejects_garbage() {
        assert_eq!(parse_gtfs_time(""), None);
        assert_eq!(parse_gtfs_time("08:00"), None);
        assert_eq!(parse_gtfs_time("08:61:00"), None);
        assert_eq!(parse_gtfs_time("08:00:00:00"), None);
        assert_eq!(parse_gtfs_time("aa:bb:cc"), None);
    }

    #[test]
    fn test_parse_service_date() {
        assert_eq!(
            parse_service_date("20240105"),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(parse_service_date("2024-01-05"), None);
        assert_eq!(parse_service_date("20241305"), None);
    }
}
