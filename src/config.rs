//! Agency configuration.
//!
//! Loaded from a JSON file (default `config/agencies.json`):
//! ```json
//! {
//!   "agencies": [
//!     {
//!       "agency": "BART",
//!       "static_agency_id": "BART_SF",
//!       "timezone": "America/Los_Angeles",
//!       "static_dir": "data/bart_sf",
//!       "matching": { "fallback": { "mode": "window", "tolerance_secs": 600 } },
//!       "feeds": [{ "url": "http://api.bart.gov/gtfsrt/tripupdate.aspx" }]
//!     }
//!   ]
//! }
//! ```

use crate::error::ConfigError;
use crate::reconciler::strategy::MatchingStrategy;
use crate::records::CurrentStatus;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub agencies: Vec<AgencyConfig>,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Unit a provider reports delay offsets in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    #[default]
    Seconds,
    Minutes,
}

impl DelayUnit {
    pub fn to_seconds(self, value: i64) -> i64 {
        match self {
            DelayUnit::Seconds => value,
            DelayUnit::Minutes => value * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgencyConfig {
    /// Agency label used by the real-time feed and the ingestion sink.
    pub agency: String,
    /// Agency id of the static schedule, when it differs from `agency`.
    #[serde(default)]
    pub static_agency_id: Option<String>,
    #[serde(default = "AgencyConfig::default_timezone")]
    pub timezone: String,
    /// Static GTFS location: an extracted directory or a `.zip` archive.
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Folder inside the archive that holds the GTFS files
    /// (e.g. `mta_nyc_data`). Ignored for directories.
    #[serde(default)]
    pub static_prefix: Option<String>,
    #[serde(default)]
    pub delay_unit: DelayUnit,
    /// Provider status names mapped onto canonical statuses. Keys are
    /// compared case-insensitively and take precedence over the defaults.
    #[serde(default)]
    pub status_map: HashMap<String, CurrentStatus>,
    /// Records whose provider timestamp lags ingestion by more than this
    /// are dropped as stale.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
    #[serde(default)]
    pub matching: MatchingStrategy,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl AgencyConfig {
    fn default_timezone() -> String {
        "UTC".to_string()
    }

    /// Minimal configuration, mainly for tests and ad-hoc runs.
    pub fn new(agency: &str) -> Self {
        Self {
            agency: agency.to_string(),
            static_agency_id: None,
            timezone: Self::default_timezone(),
            static_dir: None,
            static_prefix: None,
            delay_unit: DelayUnit::default(),
            status_map: HashMap::new(),
            stale_after_secs: None,
            matching: MatchingStrategy::default(),
            feeds: Vec::new(),
        }
    }

    pub fn static_agency_id(&self) -> &str {
        self.static_agency_id.as_deref().unwrap_or(&self.agency)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    /// Subset of the agency's network the feed covers (e.g. MTA `ACE`).
    #[serde(default)]
    pub line_group: Option<String>,
    #[serde(default)]
    pub auth: FeedAuth,
}

/// How a feed expects its API key. The key itself is read from the
/// environment variable named by `key_env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    #[default]
    None,
    Header { header_name: String, key_env: String },
    UrlParam { param_name: String, key_env: String },
}

/// A configured agency with its timezone resolved.
#[derive(Debug, Clone)]
pub struct Agency {
    pub config: AgencyConfig,
    pub tz: Tz,
}

impl Agency {
    pub fn label(&self) -> &str {
        &self.config.agency
    }

    pub fn static_agency_id(&self) -> &str {
        self.config.static_agency_id()
    }

    pub fn strategy(&self) -> &MatchingStrategy {
        &self.config.matching
    }
}

/// Lookup table from real-time agency label to its resolved configuration.
///
/// Adding an agency means adding an entry; nothing else branches on
/// agency names.
#[derive(Debug, Clone, Default)]
pub struct AgencyTable {
    agencies: BTreeMap<String, Agency>,
}

impl AgencyTable {
    pub fn from_configs(configs: Vec<AgencyConfig>) -> Result<Self, ConfigError> {
        let mut agencies = BTreeMap::new();
        for config in configs {
            let tz: Tz = config
                .timezone
                .parse()
                .map_err(|_| ConfigError::UnknownTimezone {
                    agency: config.agency.clone(),
                    timezone: config.timezone.clone(),
                })?;
            let label = config.agency.clone();
            if agencies.insert(label.clone(), Agency { config, tz }).is_some() {
                return Err(ConfigError::DuplicateAgency(label));
            }
        }
        Ok(Self { agencies })
    }

    pub fn get(&self, agency: &str) -> Option<&Agency> {
        self.agencies.get(agency)
    }

    /// Agencies in label order.
    pub fn iter(&self) -> impl Iterator<Item = &Agency> {
        self.agencies.values()
    }

    pub fn len(&self) -> usize {
        self.agencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
    }
}

impl TryFrom<Settings> for AgencyTable {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        Self::from_configs(settings.agencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::strategy::Fallback;

    const SAMPLE: &str = r#"{
        "agencies": [
            {
                "agency": "BART",
                "static_agency_id": "BART_SF",
                "timezone": "America/Los_Angeles",
                "status_map": { "late": "in_transit" },
                "matching": { "fallback": { "mode": "window", "tolerance_secs": 300 } },
                "feeds": [{ "url": "http://example.test/tu" }]
            },
            {
                "agency": "MTA",
                "static_agency_id": "MTA_NYC",
                "timezone": "America/New_York",
                "delay_unit": "seconds",
                "feeds": [{
                    "url": "http://example.test/ace",
                    "line_group": "ACE",
                    "auth": { "type": "header", "header_name": "x-api-key", "key_env": "MTA_API_KEY" }
                }]
            }
        ]
    }"#;

    #[test]
    fn parses_sample_settings() {
        let settings: Settings = serde_json::from_str(SAMPLE).unwrap();
        let table = AgencyTable::try_from(settings).unwrap();
        assert_eq!(table.len(), 2);

        let bart = table.get("BART").unwrap();
        assert_eq!(bart.static_agency_id(), "BART_SF");
        assert_eq!(
            bart.strategy().fallback,
            Fallback::Window { tolerance_secs: 300 }
        );
        assert_eq!(bart.config.status_map["late"], CurrentStatus::InTransit);

        let mta = table.get("MTA").unwrap();
        assert_eq!(mta.strategy().fallback, Fallback::Disabled);
        assert_eq!(
            mta.config.feeds[0].auth,
            FeedAuth::Header {
                header_name: "x-api-key".into(),
                key_env: "MTA_API_KEY".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut config = AgencyConfig::new("X");
        config.timezone = "Mars/Olympus".into();
        let err = AgencyTable::from_configs(vec![config]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTimezone { .. }));
    }

    #[test]
    fn rejects_duplicate_agency() {
        let err =
            AgencyTable::from_configs(vec![AgencyConfig::new("X"), AgencyConfig::new("X")])
                .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAgency(_)));
    }

    #[test]
    fn static_id_defaults_to_label() {
        assert_eq!(AgencyConfig::new("BART").static_agency_id(), "BART");
    }

    #[test]
    fn minutes_convert_to_seconds() {
        assert_eq!(DelayUnit::Minutes.to_seconds(3), 180);
        assert_eq!(DelayUnit::Seconds.to_seconds(3), 3);
    }
}
