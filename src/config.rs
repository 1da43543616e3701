/// Run configuration for the flash-flood pipeline.
///
/// Everything the decision core treats as static data lives here: the region
/// memberships, the upstream map, per-district severity orders, trigger
/// thresholds and the forcing/ledger settings. A configuration is loaded once
/// per run, validated, and then shared read-only by every stage.
///
/// Loading order: the TOML file named by `FLASHFLOOD_CONFIG` (after `.env` is
/// read), otherwise the built-in registry from `registry::default_config`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::severity::SeverityOrder;
use crate::registry;

pub const CONFIG_PATH_VAR: &str = "FLASHFLOOD_CONFIG";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("area {0} is missing from the upstream map")]
    UnknownArea(String),
    #[error("no severity order configured for district {0}")]
    MissingSeverityOrder(String),
    #[error("invalid severity order: {0}")]
    InvalidSeverityOrder(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    /// Affected-population count an area must exceed, before correction.
    pub base_threshold: f64,
    /// Lead times (hours) at which a triggering area is reported as a warning.
    pub warning_lead_times: BTreeSet<i64>,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            base_threshold: 20.0,
            warning_lead_times: [24, 48].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForcingSettings {
    /// Native sampling interval of the satellite archive.
    pub archive_interval_minutes: i64,
    /// Yesterday's primary run is still used before this UTC hour.
    pub primary_cutoff_hour_utc: u32,
    /// Values above this are treated as sensor or encoding garbage.
    pub max_plausible_mm: f64,
    /// Archive older than this (relative to now) is reported as stale.
    pub archive_max_age_minutes: u64,
}

impl Default for ForcingSettings {
    fn default() -> Self {
        Self {
            archive_interval_minutes: 30,
            primary_cutoff_hour_utc: 7,
            max_plausible_mm: 1000.0,
            archive_max_age_minutes: 12 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    File,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub backend: LedgerBackend,
    /// JSON ledger location for the file backend.
    pub path: PathBuf,
    /// Table name for the postgres backend.
    pub table: String,
    pub retention_days: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::File,
            path: PathBuf::from("data/events/leadtime_0_events.json"),
            table: "historic_events".to_string(),
            retention_days: 5,
        }
    }
}

/// A named group of areas that alerts as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    /// District whose severity order ranks this region's areas.
    pub district: String,
    pub members: Vec<String>,
    /// Free text shown by `check-config`.
    #[serde(default)]
    pub description: String,
    /// Per-area threshold corrections that win over the global table.
    #[serde(default)]
    pub threshold_overrides: BTreeMap<String, f64>,
}

fn default_checkpoints() -> Vec<i64> {
    registry::LEAD_TIME_CHECKPOINTS.to_vec()
}

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_checkpoints")]
    pub lead_time_checkpoints: Vec<i64>,
    /// Areas with fast runoff; only these are classified on 1/2/4 h windows.
    #[serde(default)]
    pub short_lag_areas: BTreeSet<String>,
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub forcing: ForcingSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Additive per-area corrections to the base threshold.
    #[serde(default)]
    pub threshold_corrections: BTreeMap<String, f64>,
    /// Area → contributing areas (including itself).
    pub upstream: BTreeMap<String, Vec<String>>,
    /// District → scenario labels, least to most severe.
    pub severity_orders: BTreeMap<String, SeverityOrder>,
    pub regions: Vec<RegionConfig>,
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads the file named by `FLASHFLOOD_CONFIG`, or the built-in registry
    /// when the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => registry::default_config(),
        }
    }

    /// Checks the cross-references between sections.
    ///
    /// Every problem found here would otherwise surface mid-run as a missing
    /// lookup, so all of them are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::Invalid("no regions configured".into()));
        }

        let mut region_names = HashSet::new();
        let mut seen_members: HashSet<&str> = HashSet::new();
        for region in &self.regions {
            if !region_names.insert(region.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "region {} is defined twice",
                    region.name
                )));
            }
            if region.members.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "region {} has no member areas",
                    region.name
                )));
            }
            if !self.severity_orders.contains_key(&region.district) {
                return Err(ConfigError::MissingSeverityOrder(region.district.clone()));
            }
            for member in &region.members {
                if !self.upstream.contains_key(member) {
                    return Err(ConfigError::UnknownArea(member.clone()));
                }
                if !seen_members.insert(member.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "area {} belongs to more than one region",
                        member
                    )));
                }
            }
            for area in region.threshold_overrides.keys() {
                if !region.members.contains(area) {
                    return Err(ConfigError::Invalid(format!(
                        "threshold override for {} which is not a member of region {}",
                        area, region.name
                    )));
                }
            }
        }

        for (area, contributors) in &self.upstream {
            if !contributors.contains(area) {
                return Err(ConfigError::Invalid(format!(
                    "upstream list of {} must include the area itself",
                    area
                )));
            }
            if let Some(missing) = contributors.iter().find(|c| !self.upstream.contains_key(*c)) {
                return Err(ConfigError::UnknownArea(missing.clone()));
            }
        }

        if let Some(missing) = self
            .short_lag_areas
            .iter()
            .find(|a| !self.upstream.contains_key(*a))
        {
            return Err(ConfigError::UnknownArea(missing.clone()));
        }

        if self.lead_time_checkpoints.is_empty() {
            return Err(ConfigError::Invalid("no lead-time checkpoints".into()));
        }
        if self.lead_time_checkpoints.iter().any(|h| *h < 0) {
            return Err(ConfigError::Invalid(
                "lead-time checkpoints must not be negative".into(),
            ));
        }
        if !self.lead_time_checkpoints.windows(2).all(|w| w[0] < w[1]) {
            return Err(ConfigError::Invalid(
                "lead-time checkpoints must be strictly increasing".into(),
            ));
        }

        if !self.trigger.base_threshold.is_finite() {
            return Err(ConfigError::Invalid("base threshold must be finite".into()));
        }
        if self.forcing.archive_interval_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "archive interval must be positive".into(),
            ));
        }
        if self.forcing.primary_cutoff_hour_utc > 23 {
            return Err(ConfigError::Invalid(
                "primary cutoff hour must be within 0..=23".into(),
            ));
        }
        if self.ledger.retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "ledger retention must be at least one day".into(),
            ));
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn region_of(&self, area: &str) -> Option<&RegionConfig> {
        self.regions
            .iter()
            .find(|r| r.members.iter().any(|m| m == area))
    }

    /// District of an area, `None` for contributor-only areas.
    pub fn district_of(&self, area: &str) -> Option<&str> {
        self.region_of(area).map(|r| r.district.as_str())
    }

    /// One line per region for `check-config`: name, district, size and description.
    pub fn region_summaries(&self) -> Vec<String> {
        self.regions
            .iter()
            .map(|r| {
                let mut line = format!("{} ({}): {} area(s)", r.name, r.district, r.members.len());
                if !r.description.is_empty() {
                    line.push_str(" - ");
                    line.push_str(&r.description);
                }
                line
            })
            .collect()
    }

    pub fn severity_order(&self, district: &str) -> Result<&SeverityOrder, ConfigError> {
        self.severity_orders
            .get(district)
            .ok_or_else(|| ConfigError::MissingSeverityOrder(district.to_string()))
    }

    pub fn upstream_of(&self, area: &str) -> Result<&[String], ConfigError> {
        self.upstream
            .get(area)
            .map(|v| v.as_slice())
            .ok_or_else(|| ConfigError::UnknownArea(area.to_string()))
    }

    pub fn is_short_lag(&self, area: &str) -> bool {
        self.short_lag_areas.contains(area)
    }

    /// Additive correction for an area: region override, then global table, then 0.
    pub fn threshold_correction(&self, area: &str) -> f64 {
        self.region_of(area)
            .and_then(|r| r.threshold_overrides.get(area))
            .or_else(|| self.threshold_corrections.get(area))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn corrected_threshold(&self, area: &str) -> f64 {
        self.trigger.base_threshold + self.threshold_correction(area)
    }

    pub fn is_warning_lead_time(&self, lead_time_hours: i64) -> bool {
        self.trigger.warning_lead_times.contains(&lead_time_hours)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
