use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw position reported by a location provider, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Whole-degree position sent to the weather API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: i32,
    pub longitude: i32,
}

impl Coordinate {
    /// Value used before any fix has been read.
    ///
    /// Note: (-1, -1) is also a real place in the Gulf of Guinea, so a fix
    /// that truncates to it cannot be told apart from "no fix".
    pub const UNSET: Coordinate = Coordinate { latitude: -1, longitude: -1 };

    pub const fn new(latitude: i32, longitude: i32) -> Self {
        Self { latitude, longitude }
    }

    /// Truncates toward zero, so 37.9 becomes 37 and -122.7 becomes -122.
    pub fn from_fix(fix: Fix) -> Self {
        Self {
            latitude: fix.latitude as i32,
            longitude: fix.longitude as i32,
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lat {}, lon {}", self.latitude, self.longitude)
    }
}

/// Decoded current conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeatherSummary {
    city: String,
    temperature_f: i32,
    description: String,
}

impl WeatherSummary {
    pub fn new(city: String, temperature_f: i32, description: String) -> Self {
        Self { city, temperature_f, description }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn temperature_f(&self) -> i32 {
        self.temperature_f
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection, URL or HTTP status failure.
    Transport,
    /// Body was not valid JSON.
    Malformed,
    /// JSON was valid but a required field was absent or had the wrong type.
    MissingField,
    /// Another refresh was already running.
    Busy,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Malformed => "malformed",
            FailureKind::MissingField => "missing_field",
            FailureKind::Busy => "busy",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Success(WeatherSummary),
    Failure { kind: FailureKind, message: String },
}

impl FetchResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        FetchResult::Failure { kind, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn summary(&self) -> Option<&WeatherSummary> {
        match self {
            FetchResult::Success(summary) => Some(summary),
            FetchResult::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchResult::Success(_) => None,
            FetchResult::Failure { kind, .. } => Some(*kind),
        }
    }
}
