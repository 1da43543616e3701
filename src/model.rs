/// Core data types for the flash-flood decision pipeline.
///
/// This module defines the shared domain model imported by all other modules:
/// rainfall points and per-area series, aggregation windows, scenario labels,
/// and the per-area / per-region decisions handed to the upload collaborator.
/// Apart from label parsing it contains no logic and performs no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::ledger::LedgerError;

// ---------------------------------------------------------------------------
// Rainfall sources
// ---------------------------------------------------------------------------

/// Where a rainfall value came from.
///
/// The order of variants carries no meaning; precedence between sources is
/// decided by the order in which the forcing builder assembles them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceTag {
    /// Satellite-observed accumulation archive.
    Archive,
    /// High-resolution regional forecast model.
    PrimaryForecast,
    /// Coarse global forecast model used when the regional one is stale.
    FallbackForecast,
    /// Model data bridging the archive's end and the forecast's start.
    GapFill,
    /// Field rain gauge.
    Gauge,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Archive => write!(f, "ARCHIVE"),
            SourceTag::PrimaryForecast => write!(f, "PRIMARY_FORECAST"),
            SourceTag::FallbackForecast => write!(f, "FALLBACK_FORECAST"),
            SourceTag::GapFill => write!(f, "GAP_FILL"),
            SourceTag::Gauge => write!(f, "GAUGE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rainfall series
// ---------------------------------------------------------------------------

/// A single incremental rainfall amount for one area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainfallPoint {
    pub timestamp: DateTime<Utc>,
    /// Millimetres fallen in the step ending at `timestamp`.
    /// `None` when the source value was implausible or undefined.
    pub precipitation_mm: Option<f64>,
    pub source: SourceTag,
}

impl RainfallPoint {
    pub fn new(timestamp: DateTime<Utc>, precipitation_mm: Option<f64>, source: SourceTag) -> Self {
        Self {
            timestamp,
            precipitation_mm,
            source,
        }
    }
}

/// The continuous forcing series of one administrative area (TA).
///
/// Timestamps are strictly increasing. The only way to build one is
/// `from_points`, which enforces that invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaSeries {
    pub area: String,
    points: Vec<RainfallPoint>,
}

impl AreaSeries {
    /// Builds a series from points listed in precedence order.
    ///
    /// Points are sorted by timestamp with a stable sort, so when two points
    /// share a timestamp the one listed first survives (keep-first).
    pub fn from_points(
        area: impl Into<String>,
        points: impl IntoIterator<Item = RainfallPoint>,
    ) -> Self {
        let mut points: Vec<RainfallPoint> = points.into_iter().collect();
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        Self {
            area: area.into(),
            points,
        }
    }

    pub fn points(&self) -> &[RainfallPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.timestamp)
    }

    /// Number of points contributed by each source.
    pub fn source_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for point in &self.points {
            *counts.entry(point.source.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Aggregation windows
// ---------------------------------------------------------------------------

/// Trailing aggregation windows, shortest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    H1,
    H2,
    H4,
    H12,
    H24,
    H48,
}

impl Window {
    pub const ALL: [Window; 6] = [
        Window::H1,
        Window::H2,
        Window::H4,
        Window::H12,
        Window::H24,
        Window::H48,
    ];

    pub fn hours(self) -> i64 {
        match self {
            Window::H1 => 1,
            Window::H2 => 2,
            Window::H4 => 4,
            Window::H12 => 12,
            Window::H24 => 24,
            Window::H48 => 48,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::hours(self.hours())
    }

    /// Column position of this window in a `WindowSums` row.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_hours(hours: i64) -> Option<Window> {
        Window::ALL.into_iter().find(|w| w.hours() == hours)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hr", self.hours())
    }
}

// ---------------------------------------------------------------------------
// Scenario labels
// ---------------------------------------------------------------------------

/// A discretised (depth, duration) rainfall bucket, e.g. `30mm_12hr`.
///
/// Each non-zero label names a pre-computed flood-impact dataset. A depth of
/// zero is the "no-event" label for that duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScenarioLabel {
    pub depth_mm: u32,
    pub window: Window,
}

impl ScenarioLabel {
    pub fn new(depth_mm: u32, window: Window) -> Self {
        Self { depth_mm, window }
    }

    pub fn no_event(window: Window) -> Self {
        Self { depth_mm: 0, window }
    }

    pub fn is_no_event(&self) -> bool {
        self.depth_mm == 0
    }
}

impl fmt::Display for ScenarioLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mm_{}", self.depth_mm, self.window)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid scenario label '{0}', expected e.g. '30mm_12hr'")]
pub struct LabelParseError(pub String);

impl FromStr for ScenarioLabel {
    type Err = LabelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LabelParseError(s.to_string());
        let (depth, duration) = s.trim().split_once("mm_").ok_or_else(invalid)?;
        let depth_mm: u32 = depth.parse().map_err(|_| invalid())?;
        let hours: i64 = duration
            .strip_suffix("hr")
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let window = Window::from_hours(hours).ok_or_else(invalid)?;
        Ok(ScenarioLabel { depth_mm, window })
    }
}

impl TryFrom<String> for ScenarioLabel {
    type Error = LabelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScenarioLabel> for String {
    fn from(label: ScenarioLabel) -> Self {
        label.to_string()
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The single worst scenario expected for an area within the forecast horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaDecision {
    pub area: String,
    pub scenario: ScenarioLabel,
    /// Hours from "now" at which the scenario first occurs.
    pub lead_time_hours: i64,
}

/// Alert state of one region, as handed to the upload collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDecision {
    pub region: String,
    pub triggered: bool,
    /// Earliest lead time among member areas that individually trigger.
    pub lead_time_hours: Option<i64>,
    /// Every member area with a non-zero scenario, triggering or not.
    pub events: BTreeMap<String, ScenarioLabel>,
}

impl RegionDecision {
    pub fn untriggered(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            triggered: false,
            lead_time_hours: None,
            events: BTreeMap::new(),
        }
    }

    /// True when the region is confirmed flooding now.
    pub fn is_confirmed_now(&self) -> bool {
        self.triggered && self.lead_time_hours == Some(0)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures reported by external data collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The source has nothing published for the requested run.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The source answered but its content could not be interpreted.
    #[error("malformed source data: {0}")]
    Malformed(String),
}

/// Run-aborting failures. Any of these stops the run before dispatch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable forecast source: {0}")]
    NoForecastSource(SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("scenario {scenario} for area {area} is not ranked in the {district} severity order")]
    UnrankedScenario {
        area: String,
        scenario: ScenarioLabel,
        district: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
