//! Per-agency matching strategies.

use serde::{Deserialize, Serialize};

/// Default fallback tolerance: ten minutes either side.
pub const DEFAULT_TOLERANCE_SECS: u32 = 600;

/// How an agency's real-time trip ids are matched against its schedule.
///
/// ```json
/// {
///   "normalize": { "rule": "strip_suffix_after", "delimiter": "_" },
///   "fallback": { "mode": "window", "tolerance_secs": 600 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingStrategy {
    #[serde(default)]
    pub normalize: Option<IdRule>,
    #[serde(default)]
    pub fallback: Fallback,
}

impl MatchingStrategy {
    pub fn exact_only() -> Self {
        Self::default()
    }

    pub fn with_window(tolerance_secs: u32) -> Self {
        Self {
            normalize: None,
            fallback: Fallback::Window { tolerance_secs },
        }
    }
}

/// Whether the departure-window fallback runs after id matching fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Fallback {
    #[default]
    Disabled,
    Window {
        #[serde(default = "default_tolerance_secs")]
        tolerance_secs: u32,
    },
}

fn default_tolerance_secs() -> u32 {
    DEFAULT_TOLERANCE_SECS
}

/// Rewrites a real-time trip id into the agency's static id scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum IdRule {
    /// `"T1_20240102"` with `_` becomes `"T1"`.
    StripSuffixAfter { delimiter: String },
    /// `"run7:T1"` with `:` becomes `"T1"`.
    StripPrefixBefore { delimiter: String },
    /// Drops a leading or trailing `YYYYMMDD` joined by `_` or `-`.
    StripServiceDate,
    Chain { rules: Vec<IdRule> },
}

impl IdRule {
    pub fn apply(&self, id: &str) -> String {
        match self {
            IdRule::StripSuffixAfter { delimiter } => match id.rsplit_once(delimiter.as_str()) {
                Some((head, _)) => head.to_string(),
                None => id.to_string(),
            },
            IdRule::StripPrefixBefore { delimiter } => match id.split_once(delimiter.as_str()) {
                Some((_, tail)) => tail.to_string(),
                None => id.to_string(),
            },
            IdRule::StripServiceDate => strip_service_date(id).to_string(),
            IdRule::Chain { rules } => rules
                .iter()
                .fold(id.to_string(), |acc, rule| rule.apply(&acc)),
        }
    }
}

fn is_service_date(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_service_date(id: &str) -> &str {
    for sep in ['_', '-'] {
        if let Some((head, tail)) = id.rsplit_once(sep) {
            if is_service_date(tail) && !head.is_empty() {
                return head;
            }
        }
        if let Some((head, tail)) = id.split_once(sep) {
            if is_service_date(head) && !tail.is_empty() {
                return tail;
            }
        }
    }
    id
}
