/// File-based run inputs.
///
/// The download and GIS collaborators drop everything one run needs into a
/// single JSON document: the archive, every primary model issue on hand, the
/// fallback model run, gauge counters, water-level sensor files and the
/// impact table. `RunBundle`
/// deserialises that document and serves it through the same traits the
/// pipeline uses for live sources.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::thresholds::{ImpactRecord, StaticImpactTable};
use crate::ingest::forcing::{ForecastProvider, ModelRun};
use crate::ingest::gauge::GaugeReading;
use crate::ingest::waterlevel::SensorFeed;
use crate::model::SourceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryIssue {
    pub issue: NaiveDate,
    pub run: ModelRun,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBundle {
    #[serde(default)]
    pub archive: ModelRun,
    #[serde(default)]
    pub primary: Vec<PrimaryIssue>,
    #[serde(default)]
    pub fallback: Option<ModelRun>,
    #[serde(default)]
    pub gauges: BTreeMap<String, Vec<GaugeReading>>,
    #[serde(default)]
    pub water_levels: Vec<SensorFeed>,
    #[serde(default)]
    pub impact: Vec<ImpactRecord>,
}

impl RunBundle {
    pub fn from_json_str(text: &str) -> Result<Self, SourceError> {
        serde_json::from_str(text).map_err(|e| SourceError::Malformed(format!("run bundle: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SourceError::Unavailable(format!("cannot read run bundle {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn impact_table(&self) -> StaticImpactTable {
        StaticImpactTable::from_records(&self.impact)
    }
}

impl ForecastProvider for RunBundle {
    fn latest_primary_issue(&self) -> Option<NaiveDate> {
        self.primary.iter().map(|p| p.issue).max()
    }

    fn primary_issue_available(&self, issue: NaiveDate) -> bool {
        self.primary.iter().any(|p| p.issue == issue)
    }

    fn fetch_primary(&self, issue: NaiveDate) -> Result<ModelRun, SourceError> {
        self.primary
            .iter()
            .find(|p| p.issue == issue)
            .map(|p| p.run.clone())
            .ok_or_else(|| SourceError::Unavailable(format!("no primary run issued {}", issue)))
    }

    fn fetch_fallback(&self, _reference: DateTime<Utc>) -> Result<ModelRun, SourceError> {
        self.fallback
            .clone()
            .ok_or_else(|| SourceError::Unavailable("bundle carries no fallback run".into()))
    }
}
