//! Impact-threshold checking and regional aggregation.
//!
//! An area's worst scenario only matters if enough people would be affected.
//! Each area's affected population is compared against a corrected threshold,
//! and the per-area results are folded into one decision per region.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::logging::{self, Stage};
use crate::model::{AreaDecision, RegionDecision, ScenarioLabel};

// ---------------------------------------------------------------------------
// Impact lookup
// ---------------------------------------------------------------------------

/// Affected-population figures per (area, scenario), from the exposure tables.
pub trait ImpactLookup {
    fn affected_population(&self, area: &str, scenario: &ScenarioLabel) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub area: String,
    pub scenario: ScenarioLabel,
    pub affected_people: f64,
}

/// In-memory impact table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticImpactTable {
    entries: HashMap<(String, ScenarioLabel), f64>,
}

impl StaticImpactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, area: impl Into<String>, scenario: ScenarioLabel, affected_people: f64) {
        self.entries.insert((area.into(), scenario), affected_people);
    }

    pub fn from_records(records: &[ImpactRecord]) -> Self {
        let mut table = Self::new();
        for record in records {
            table.insert(record.area.clone(), record.scenario, record.affected_people);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ImpactLookup for StaticImpactTable {
    fn affected_population(&self, area: &str, scenario: &ScenarioLabel) -> Option<f64> {
        self.entries.get(&(area.to_string(), *scenario)).copied()
    }
}

// ---------------------------------------------------------------------------
// Area assessment
// ---------------------------------------------------------------------------

/// Alert level of one area, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaAlertLevel {
    /// Non-zero scenario, population at or below threshold.
    Watch,
    /// Would trigger, but the lead time is warning-only.
    Warning,
    Trigger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaAssessment {
    pub area: String,
    pub scenario: ScenarioLabel,
    pub lead_time_hours: i64,
    /// `None` when the exposure tables have no figure for this scenario.
    pub affected_population: Option<f64>,
    pub threshold: f64,
    pub level: AreaAlertLevel,
}

/// Level for one area. A missing population never exceeds the threshold.
pub fn alert_level(affected_population: Option<f64>, threshold: f64, warning_only: bool) -> AreaAlertLevel {
    match affected_population {
        Some(people) if people > threshold => {
            if warning_only {
                AreaAlertLevel::Warning
            } else {
                AreaAlertLevel::Trigger
            }
        }
        _ => AreaAlertLevel::Watch,
    }
}

// ---------------------------------------------------------------------------
// Regional aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionAssessment {
    pub decision: RegionDecision,
    pub areas: Vec<AreaAssessment>,
}

pub struct RegionalTriggerEngine<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RegionalTriggerEngine<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn assess_area(&self, decision: &AreaDecision, impact: &dyn ImpactLookup) -> AreaAssessment {
        let affected_population = impact.affected_population(&decision.area, &decision.scenario);
        if affected_population.is_none() {
            logging::debug(
                Stage::Trigger,
                Some(decision.area.as_str()),
                &format!("no impact figure for {}", decision.scenario),
            );
        }
        let threshold = self.config.corrected_threshold(&decision.area);
        let level = alert_level(
            affected_population,
            threshold,
            self.config.is_warning_lead_time(decision.lead_time_hours),
        );
        AreaAssessment {
            area: decision.area.clone(),
            scenario: decision.scenario,
            lead_time_hours: decision.lead_time_hours,
            affected_population,
            threshold,
            level,
        }
    }

    /// One assessment per configured region, in configuration order.
    ///
    /// Areas without a decision (no non-zero scenario) are left out entirely.
    pub fn evaluate(
        &self,
        decisions: &BTreeMap<String, AreaDecision>,
        impact: &dyn ImpactLookup,
    ) -> Vec<RegionAssessment> {
        self.config
            .regions
            .iter()
            .map(|region| {
                let areas: Vec<AreaAssessment> = region
                    .members
                    .iter()
                    .filter_map(|member| decisions.get(member))
                    .map(|decision| self.assess_area(decision, impact))
                    .collect();

                let lead_time_hours = areas
                    .iter()
                    .filter(|a| a.level == AreaAlertLevel::Trigger)
                    .map(|a| a.lead_time_hours)
                    .min();
                let decision = RegionDecision {
                    region: region.name.clone(),
                    triggered: lead_time_hours.is_some(),
                    lead_time_hours,
                    events: areas.iter().map(|a| (a.area.clone(), a.scenario)).collect(),
                };

                if decision.triggered {
                    logging::info(
                        Stage::Trigger,
                        None,
                        &format!(
                            "region {} triggered at lead time {}h",
                            region.name,
                            lead_time_hours.unwrap_or_default()
                        ),
                    );
                }
                RegionAssessment { decision, areas }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
