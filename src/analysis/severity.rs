/// Worst-scenario selection per area.
///
/// Each district has a curated total order over scenario labels. For every
/// area the ranker looks at the classified rows that fall on a lead-time
/// checkpoint, picks the most severe label present, and reports the lead time
/// at which it first appears.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::classify::ClassifiedSeries;
use crate::config::ConfigError;
use crate::model::{AreaDecision, PipelineError, ScenarioLabel};

// ---------------------------------------------------------------------------
// Severity order
// ---------------------------------------------------------------------------

/// Scenario labels from least to most severe.
///
/// No-event labels are never ranked; they lose to every ranked label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScenarioLabel>", into = "Vec<ScenarioLabel>")]
pub struct SeverityOrder {
    labels: Vec<ScenarioLabel>,
    ranks: HashMap<ScenarioLabel, usize>,
}

impl SeverityOrder {
    pub fn new(labels: Vec<ScenarioLabel>) -> Result<Self, ConfigError> {
        if labels.is_empty() {
            return Err(ConfigError::InvalidSeverityOrder("order is empty".into()));
        }
        let mut ranks = HashMap::with_capacity(labels.len());
        for (rank, label) in labels.iter().enumerate() {
            if label.is_no_event() {
                return Err(ConfigError::InvalidSeverityOrder(format!(
                    "no-event label {} cannot be ranked",
                    label
                )));
            }
            if ranks.insert(*label, rank).is_some() {
                return Err(ConfigError::InvalidSeverityOrder(format!(
                    "label {} appears twice",
                    label
                )));
            }
        }
        Ok(Self { labels, ranks })
    }

    /// Position of a label, higher is more severe.
    pub fn rank(&self, label: &ScenarioLabel) -> Option<usize> {
        self.ranks.get(label).copied()
    }

    pub fn contains(&self, label: &ScenarioLabel) -> bool {
        self.ranks.contains_key(label)
    }

    pub fn labels(&self) -> &[ScenarioLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl TryFrom<Vec<ScenarioLabel>> for SeverityOrder {
    type Error = ConfigError;

    fn try_from(labels: Vec<ScenarioLabel>) -> Result<Self, Self::Error> {
        SeverityOrder::new(labels)
    }
}

impl From<SeverityOrder> for Vec<ScenarioLabel> {
    fn from(order: SeverityOrder) -> Self {
        order.labels
    }
}

// ---------------------------------------------------------------------------
// Lead time
// ---------------------------------------------------------------------------

/// Whole hours from `now` to `timestamp`, truncated toward zero.
pub fn lead_time_hours(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (timestamp - now).num_seconds() / 3600
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

pub struct SeverityRanker<'a> {
    checkpoints: &'a [i64],
}

impl<'a> SeverityRanker<'a> {
    pub fn new(checkpoints: &'a [i64]) -> Self {
        Self { checkpoints }
    }

    /// Picks the worst scenario of one area.
    ///
    /// Returns `Ok(None)` when every label on every checkpoint row is a
    /// no-event label. A non-zero label missing from `order` is fatal.
    pub fn rank_area(
        &self,
        classified: &ClassifiedSeries,
        district: &str,
        order: &SeverityOrder,
        now: DateTime<Utc>,
    ) -> Result<Option<AreaDecision>, PipelineError> {
        // first lead time at which each label appears; rows are in time order
        let mut first_seen: BTreeMap<ScenarioLabel, i64> = BTreeMap::new();
        let mut worst: Option<(usize, ScenarioLabel)> = None;

        for (timestamp, labels) in &classified.rows {
            let lead = lead_time_hours(*timestamp, now);
            if !self.checkpoints.contains(&lead) {
                continue;
            }
            for label in labels.iter().filter(|l| !l.is_no_event()) {
                let rank = order
                    .rank(label)
                    .ok_or_else(|| PipelineError::UnrankedScenario {
                        area: classified.area.clone(),
                        scenario: *label,
                        district: district.to_string(),
                    })?;
                first_seen.entry(*label).or_insert(lead);
                if worst.is_none_or(|(best, _)| rank > best) {
                    worst = Some((rank, *label));
                }
            }
        }

        Ok(worst.and_then(|(_, scenario)| {
            first_seen.get(&scenario).map(|lead| AreaDecision {
                area: classified.area.clone(),
                scenario,
                lead_time_hours: *lead,
            })
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
