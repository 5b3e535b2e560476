use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether limited-express trains stop at a station.
///
/// `Unknown` means the listing did not expose the signal at all; it is
/// never a stand-in for `No`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitedExpress {
    Yes,
    No,
    #[default]
    Unknown,
}

impl LimitedExpress {
    pub fn is_known(&self) -> bool {
        !matches!(self, LimitedExpress::Unknown)
    }

    /// Combine a stored value with a freshly observed one.
    /// A known observation wins; `Unknown` never erases what is stored.
    pub fn merge(self, observed: LimitedExpress) -> LimitedExpress {
        if observed.is_known() { observed } else { self }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitedExpress::Yes => "yes",
            LimitedExpress::No => "no",
            LimitedExpress::Unknown => "unknown",
        }
    }
}

impl From<Option<bool>> for LimitedExpress {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => LimitedExpress::Yes,
            Some(false) => LimitedExpress::No,
            None => LimitedExpress::Unknown,
        }
    }
}

impl From<LimitedExpress> for Option<bool> {
    fn from(value: LimitedExpress) -> Self {
        match value {
            LimitedExpress::Yes => Some(true),
            LimitedExpress::No => Some(false),
            LimitedExpress::Unknown => None,
        }
    }
}

impl fmt::Display for LimitedExpress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One station as discovered on the listing page, after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    pub name: String,
    pub limited_express: LimitedExpress,
}

impl ListingEntry {
    pub fn new(name: impl Into<String>, limited_express: LimitedExpress) -> Self {
        Self {
            name: name.into(),
            limited_express,
        }
    }
}

/// Body and status of a successful HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status: 200,
        }
    }
}

/// A persisted station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Station {
    pub station_id: i64,
    pub name: String,
    pub limited_express: LimitedExpress,
}

/// A persisted travel-time measurement. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TravelTime {
    pub time_id: i64,
    pub station_id: i64,
    pub minutes: u32,
    pub measured_at: DateTime<Utc>,
}

/// Station joined with one of its measurements, as consumed by analysis tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementRow {
    pub station_name: String,
    pub limited_express: LimitedExpress,
    pub minutes: u32,
    pub measured_at: DateTime<Utc>,
}

/// Mean travel time for all measurements sharing a limited-express flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressAverage {
    pub limited_express: LimitedExpress,
    pub average_minutes: f64,
    pub measurements: u64,
}
