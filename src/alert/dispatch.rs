/// Upload planning.
///
/// The uploader publishes regions to the portal one lead time at a time, so
/// the final (latched) decisions are grouped into batches keyed by lead time.
/// A run with nothing triggered asks the portal to be reset instead.
/// Water-level sensor values ride along as point-data uploads.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::alert::latch::LatchedDecision;
use crate::ingest::waterlevel::SensorReport;
use crate::logging::{self, Stage};
use crate::model::ScenarioLabel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchBatch {
    pub lead_time_hours: i64,
    /// Portal label, e.g. `"6-hour"`.
    pub lead_time_label: String,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorValue {
    pub fid: i64,
    pub value: f64,
}

/// One point-data upload: a value per sensor under one portal key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorUpload {
    pub key: &'static str,
    pub lead_time_label: String,
    pub values: Vec<SensorValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchPlan {
    /// Ascending by lead time.
    pub batches: Vec<DispatchBatch>,
    pub reset_portal: bool,
    /// Area → scenario over every triggered region, for impact rasters.
    pub area_scenarios: BTreeMap<String, ScenarioLabel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sensor_uploads: Vec<SensorUpload>,
}

impl DispatchPlan {
    pub fn triggered_region_count(&self) -> usize {
        self.batches.iter().map(|b| b.regions.len()).sum()
    }
}

pub fn lead_time_label(lead_time_hours: i64) -> String {
    format!("{}-hour", lead_time_hours)
}

pub fn plan_dispatch(decisions: &[LatchedDecision]) -> DispatchPlan {
    let mut by_lead: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    let mut area_scenarios = BTreeMap::new();

    for latched in decisions {
        let decision = &latched.decision;
        let Some(lead) = decision.lead_time_hours.filter(|_| decision.triggered) else {
            continue;
        };
        by_lead.entry(lead).or_default().push(decision.region.clone());
        area_scenarios.extend(decision.events.iter().map(|(area, label)| (area.clone(), *label)));
    }

    let batches: Vec<DispatchBatch> = by_lead
        .into_iter()
        .map(|(lead, regions)| DispatchBatch {
            lead_time_hours: lead,
            lead_time_label: lead_time_label(lead),
            regions,
        })
        .collect();
    let reset_portal = batches.is_empty();

    if reset_portal {
        logging::info(Stage::Dispatch, None, "no region triggered, portal will be reset");
    } else {
        for batch in &batches {
            logging::info(
                Stage::Dispatch,
                None,
                &format!("{} batch: {}", batch.lead_time_label, batch.regions.join(", ")),
            );
        }
    }

    DispatchPlan {
        batches,
        reset_portal,
        area_scenarios,
        sensor_uploads: Vec::new(),
    }
}

/// Sensor values are always published under the one-hour lead time.
pub const SENSOR_LEAD_TIME_HOURS: i64 = 1;

/// Splits sensor reports into the current, previous-day and reference uploads.
///
/// A sensor missing one of the values is left out of that upload only. An
/// upload with no values at all is dropped.
pub fn plan_sensor_uploads(reports: &[SensorReport]) -> Vec<SensorUpload> {
    let keyed: [(&'static str, fn(&SensorReport) -> Option<f64>); 3] = [
        ("water-level", |r: &SensorReport| r.actual),
        ("water-level-previous", |r: &SensorReport| r.previous),
        ("water-level-reference", |r: &SensorReport| r.reference),
    ];

    let uploads: Vec<SensorUpload> = keyed
        .into_iter()
        .filter_map(|(key, pick)| {
            let values: Vec<SensorValue> = reports
                .iter()
                .filter_map(|r| pick(r).map(|value| SensorValue { fid: r.fid, value }))
                .collect();
            (!values.is_empty()).then(|| SensorUpload {
                key,
                lead_time_label: lead_time_label(SENSOR_LEAD_TIME_HOURS),
                values,
            })
        })
        .collect();

    for upload in &uploads {
        logging::info(
            Stage::Dispatch,
            None,
            &format!("{} upload for {} sensor(s)", upload.key, upload.values.len()),
        );
    }
    uploads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::latch::LatchState;
    use crate::model::RegionDecision;

    fn latched(region: &str, lead: Option<i64>, events: &[(&str, &str)]) -> LatchedDecision {
        LatchedDecision {
            decision: RegionDecision {
                region: region.to_string(),
                triggered: lead.is_some(),
                lead_time_hours: lead,
                events: events
                    .iter()
                    .map(|(a, l)| (a.to_string(), l.parse().unwrap()))
                    .collect(),
            },
            state: LatchState::Untriggered,
            confirmed_at: None,
        }
    }

    #[test]
    fn test_batches_grouped_by_lead_time_ascending() {
        let plan = plan_dispatch(&[
            latched("rumphi", Some(6), &[("MW10701", "40mm_12hr")]),
            latched("karonga", Some(0), &[("MW10106", "30mm_12hr")]),
            latched("blantyre", Some(6), &[("MW31546", "20mm_1hr")]),
        ]);

        assert!(!plan.reset_portal);
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].lead_time_label, "0-hour");
        assert_eq!(plan.batches[0].regions, vec!["karonga".to_string()]);
        assert_eq!(plan.batches[1].lead_time_hours, 6);
        assert_eq!(plan.batches[1].regions, vec!["rumphi".to_string(), "blantyre".to_string()]);
        assert_eq!(plan.triggered_region_count(), 3);
        assert_eq!(plan.area_scenarios.len(), 3);
    }

    #[test]
    fn test_untriggered_regions_only_request_reset() {
        let plan = plan_dispatch(&[
            latched("karonga", None, &[("MW10106", "30mm_12hr")]),
            latched("rumphi", None, &[]),
        ]);
        assert!(plan.reset_portal);
        assert!(plan.batches.is_empty());
        assert!(
            plan.area_scenarios.is_empty(),
            "watch-level events of untriggered regions are not published"
        );
    }

    #[test]
    fn test_sensor_reports_split_into_three_one_hour_uploads() {
        let reports = [
            SensorReport { fid: 125720411, actual: Some(473.75), previous: Some(473.25), reference: None },
            SensorReport { fid: 42, actual: Some(12.0), previous: None, reference: None },
        ];
        let uploads = plan_sensor_uploads(&reports);

        let keys: Vec<&str> = uploads.iter().map(|u| u.key).collect();
        assert_eq!(
            keys,
            vec!["water-level", "water-level-previous"],
            "no sensor has a reference value, so that upload is dropped"
        );
        assert!(uploads.iter().all(|u| u.lead_time_label == "1-hour"));
        assert_eq!(uploads[0].values.len(), 2);
        assert_eq!(uploads[1].values, vec![SensorValue { fid: 125720411, value: 473.25 }]);
    }

    #[test]
    fn test_no_sensor_reports_plan_no_uploads() {
        assert!(plan_sensor_uploads(&[]).is_empty());
        assert!(plan_dispatch(&[]).sensor_uploads.is_empty());
    }

    #[test]
    fn test_lead_time_label_format() {
        assert_eq!(lead_time_label(0), "0-hour");
        assert_eq!(lead_time_label(48), "48-hour");
    }
}
