use std::sync::Arc;
use thiserror::Error;

/// A raw update message missing a field every record must carry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedFeedError {
    #[error("raw update is missing an agency")]
    MissingAgency,
    #[error("raw update from {agency} is missing a trip_id")]
    MissingTripId { agency: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown timezone '{timezone}' for agency {agency}")]
    UnknownTimezone { agency: String, timezone: String },
    #[error("Agency {0} is configured more than once")]
    DuplicateAgency(String),
}

/// Failure of one agency's portion of an analysis run.
///
/// Other agencies in the same run are unaffected.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Static schedule for agency {agency_id} is missing or empty")]
    StaticScheduleStale { agency_id: String },
    #[error("Failed to write on-time performance for agency {agency_id}: {source}")]
    StorageWrite {
        agency_id: String,
        source: StoreError,
    },
    /// The run's single window read failed; every agency in the run shares
    /// the same source error.
    #[error("Failed to read trip updates for agency {agency}: {source}")]
    StorageRead {
        agency: String,
        source: Arc<StoreError>,
    },
    #[error("Agency {0} is not configured")]
    UnknownAgency(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display_names_agency() {
        let err = MalformedFeedError::MissingTripId {
            agency: "BART".into(),
        };
        assert_eq!(err.to_string(), "raw update from BART is missing a trip_id");
    }

    #[test]
    fn stale_schedule_display() {
        let err = PipelineError::StaticScheduleStale {
            agency_id: "MTA_NYC".into(),
        };
        assert_eq!(
            err.to_string(),
            "Static schedule for agency MTA_NYC is missing or empty"
        );
    }

    #[test]
    fn store_error_from_rusqlite() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
