/// Water-level sensor reporting.
///
/// River sensors drop one file per transmission. Each file holds a list of
/// records, and only some of them carry a level. A level is relative to the
/// sensor, so the reported value adds the ground elevation and the mounting
/// height. For every sensor the portal shows three numbers: the latest
/// level, the level about a day earlier and the typical level for the month.
///
/// These values are informational. A sensor that cannot be read is logged
/// and left out; it never stops the flood decision.
///
/// # Clock injection
/// `now` is passed in, so a replayed run picks the same files.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::logging::{self, Stage};
use crate::model::SourceError;

/// Static description of one sensor, keyed in the portal by `fid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub fid: i64,
    pub elevation: f64,
    pub sensor_height: f64,
    /// Month number (1-12) → typical level for that month.
    #[serde(default)]
    pub monthly_reference: BTreeMap<u32, f64>,
}

/// A level as transmitted: a number, or text with `*`/`T` quality markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLevel {
    Number(f64),
    Text(String),
}

impl RawLevel {
    pub fn value(&self) -> Result<f64, SourceError> {
        match self {
            RawLevel::Number(v) => Ok(*v),
            RawLevel::Text(text) => text
                .trim_matches(|c| c == '*' || c == 'T')
                .trim()
                .parse()
                .map_err(|_| SourceError::Malformed(format!("water level '{}' is not a number", text))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    #[serde(default, rename = "Wlev")]
    pub level: Option<RawLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFile {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<LevelRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFeed {
    pub info: SensorInfo,
    #[serde(default)]
    pub files: Vec<SensorFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReport {
    pub fid: i64,
    pub actual: Option<f64>,
    /// From the file closest to 24 hours before the run.
    pub previous: Option<f64>,
    pub reference: Option<f64>,
}

// ---------------------------------------------------------------------------
// Level extraction
// ---------------------------------------------------------------------------

pub fn absolute_level(info: &SensorInfo, reading: f64) -> f64 {
    reading + info.elevation + info.sensor_height
}

/// The last record in the file that carries a level.
pub fn last_level(file: &SensorFile) -> Result<Option<f64>, SourceError> {
    file.records
        .iter()
        .rev()
        .find_map(|r| r.level.as_ref())
        .map(RawLevel::value)
        .transpose()
}

/// The file whose timestamp is nearest `target`. Ties go to the earlier file.
pub fn closest_file(files: &[SensorFile], target: DateTime<Utc>) -> Option<&SensorFile> {
    files
        .iter()
        .min_by_key(|f| ((f.timestamp - target).num_seconds().abs(), f.timestamp))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Report for one sensor from the files received up to `now`.
///
/// Returns `Ok(None)` when no file has arrived yet.
pub fn sensor_report(feed: &SensorFeed, now: DateTime<Utc>) -> Result<Option<SensorReport>, SourceError> {
    let received: Vec<SensorFile> = feed
        .files
        .iter()
        .filter(|f| f.timestamp <= now)
        .cloned()
        .collect();
    let Some(latest) = received.iter().max_by_key(|f| f.timestamp) else {
        return Ok(None);
    };

    let info = &feed.info;
    let actual = last_level(latest)?.map(|v| absolute_level(info, v));
    let previous = match closest_file(&received, now - Duration::days(1)) {
        Some(file) => last_level(file)?.map(|v| absolute_level(info, v)),
        None => None,
    };
    let reference = info.monthly_reference.get(&now.month()).copied();

    Ok(Some(SensorReport {
        fid: info.fid,
        actual,
        previous,
        reference,
    }))
}

/// Reports for every sensor that could be read, in feed order.
pub fn water_level_reports(feeds: &[SensorFeed], now: DateTime<Utc>) -> Vec<SensorReport> {
    let mut reports = Vec::new();
    for feed in feeds {
        let fid = feed.info.fid.to_string();
        match sensor_report(feed, now) {
            Ok(Some(report)) => {
                logging::debug(
                    Stage::WaterLevel,
                    Some(fid.as_str()),
                    &format!("level {:?}, day before {:?}", report.actual, report.previous),
                );
                reports.push(report);
            }
            Ok(None) => logging::warn(Stage::WaterLevel, Some(fid.as_str()), "no sensor file received"),
            Err(e) => logging::warn(Stage::WaterLevel, Some(fid.as_str()), &format!("sensor skipped: {}", e)),
        }
    }
    reports
}
