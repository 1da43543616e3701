/// One end-to-end run of the decision core.
///
/// ```text
/// forcing (+ gauges) → rolling sums → upstream blend → classify → rank
///     → regional triggers → latch against the ledger → dispatch plan
/// ```
///
/// Water-level sensor reports are read next to this chain and only join it
/// at the dispatch plan.
///
/// Everything that depends on the current time takes `now` explicitly so a
/// run can be replayed for any instant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::dispatch::{plan_dispatch, plan_sensor_uploads, DispatchPlan};
use crate::alert::latch::{HistoricStickyStateManager, LatchedDecision};
use crate::alert::thresholds::{ImpactLookup, RegionAssessment, RegionalTriggerEngine};
use crate::analysis::classify::classify_series;
use crate::analysis::rolling::{blend_upstream, rolling_sums, WindowedSeries};
use crate::analysis::severity::SeverityRanker;
use crate::config::PipelineConfig;
use crate::ingest::forcing::{
    ForcingTimeseriesBuilder, ForecastChoice, ForecastProvider, GapFillOutcome, ModelRun,
};
use crate::ingest::gauge::{gauge_increments, overlay_gauge, GaugeReading};
use crate::ingest::waterlevel::{water_level_reports, SensorFeed, SensorReport};
use crate::ledger::LedgerStore;
use crate::logging::{self, Stage};
use crate::model::{AreaDecision, AreaSeries, PipelineError};

/// How the forcing for a run was put together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForcingSummary {
    pub forecast: ForecastChoice,
    pub gap_fill: GapFillOutcome,
    /// Area → source tag → number of points.
    pub source_counts: BTreeMap<String, BTreeMap<String, usize>>,
    pub gauged_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forcing: Option<ForcingSummary>,
    /// Worst scenario per region member; areas with no event are absent.
    pub area_decisions: BTreeMap<String, AreaDecision>,
    /// Fresh per-region decisions with their area detail, before latching.
    pub assessments: Vec<RegionAssessment>,
    /// Final decisions, one per configured region.
    pub regions: Vec<LatchedDecision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub water_levels: Vec<SensorReport>,
    pub dispatch: DispatchPlan,
}

pub struct FloodPipeline<'a, S: LedgerStore> {
    config: &'a PipelineConfig,
    impact: &'a dyn ImpactLookup,
    latch: HistoricStickyStateManager<S>,
}

impl<'a, S: LedgerStore> FloodPipeline<'a, S> {
    pub fn new(config: &'a PipelineConfig, impact: &'a dyn ImpactLookup, store: S) -> Self {
        Self {
            config,
            impact,
            latch: HistoricStickyStateManager::new(store, config.ledger.retention_days),
        }
    }

    pub fn store(&self) -> &S {
        self.latch.store()
    }

    pub fn into_store(self) -> S {
        self.latch.into_store()
    }

    /// Rolls, blends, classifies and ranks every region member.
    ///
    /// Every series must belong to an area in the upstream map. Areas that
    /// only contribute upstream are blended into others but never ranked.
    pub fn decide_areas(
        &self,
        series: &BTreeMap<String, AreaSeries>,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, AreaDecision>, PipelineError> {
        for area in series.keys() {
            self.config.upstream_of(area)?;
        }

        // all areas are rolled before any is blended
        let rolled: BTreeMap<String, WindowedSeries> = series
            .iter()
            .map(|(area, s)| (area.clone(), rolling_sums(s)))
            .collect();
        let blended = blend_upstream(&rolled, self.config)?;

        let ranker = SeverityRanker::new(&self.config.lead_time_checkpoints);
        let mut decisions = BTreeMap::new();
        let mut ranked = 0;
        for (area, windowed) in &blended {
            let Some(district) = self.config.district_of(area) else {
                logging::debug(Stage::Classification, Some(area.as_str()), "contributor only, not ranked");
                continue;
            };
            ranked += 1;
            let order = self.config.severity_order(district)?;
            let classified = classify_series(windowed, self.config.is_short_lag(area));
            match ranker.rank_area(&classified, district, order, now)? {
                Some(decision) => {
                    logging::debug(
                        Stage::Classification,
                        Some(area.as_str()),
                        &format!("{} at lead time {}h", decision.scenario, decision.lead_time_hours),
                    );
                    decisions.insert(area.clone(), decision);
                }
                None => logging::debug(Stage::Classification, Some(area.as_str()), "no event"),
            }
        }

        logging::info(
            Stage::Classification,
            None,
            &format!("{} of {} ranked areas carry an event", decisions.len(), ranked),
        );
        Ok(decisions)
    }

    /// Runs the decision core over already-assembled series.
    pub fn run(
        &mut self,
        series: &BTreeMap<String, AreaSeries>,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, PipelineError> {
        let area_decisions = self.decide_areas(series, now)?;

        let engine = RegionalTriggerEngine::new(self.config);
        let assessments = engine.evaluate(&area_decisions, self.impact);
        let fresh = assessments.iter().map(|a| a.decision.clone()).collect();

        let regions = self.latch.apply(fresh, now)?;
        let dispatch = plan_dispatch(&regions);

        Ok(RunOutcome {
            run_time: now,
            forcing: None,
            area_decisions,
            assessments,
            regions,
            water_levels: Vec::new(),
            dispatch,
        })
    }

    /// Builds forcing from the sources, overlays gauges, then runs.
    ///
    /// Sensor reports are attached after the decision; an unreadable sensor
    /// never fails the run.
    pub fn run_from_sources(
        &mut self,
        provider: &dyn ForecastProvider,
        archive: &ModelRun,
        gauges: &BTreeMap<String, Vec<GaugeReading>>,
        water_levels: &[SensorFeed],
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, PipelineError> {
        let build = ForcingTimeseriesBuilder::new(&self.config.forcing).build(provider, archive, now)?;
        let mut series = build.series;

        let mut gauged_areas = Vec::new();
        for (area, readings) in gauges {
            if self.config.upstream_of(area).is_err() {
                logging::warn(Stage::Gauge, Some(area.as_str()), "gauge for an unmapped area ignored");
                continue;
            }
            let increments = gauge_increments(readings);
            if increments.is_empty() {
                continue;
            }
            let forcing = series
                .remove(area)
                .unwrap_or_else(|| AreaSeries::from_points(area.as_str(), Vec::new()));
            series.insert(area.clone(), overlay_gauge(&forcing, &increments));
            gauged_areas.push(area.clone());
        }
        if !gauged_areas.is_empty() {
            logging::info(
                Stage::Gauge,
                None,
                &format!("gauge data overlaid on {} area(s)", gauged_areas.len()),
            );
        }

        let source_counts = series
            .iter()
            .map(|(area, s)| (area.clone(), s.source_counts()))
            .collect();
        let mut outcome = self.run(&series, now)?;
        outcome.forcing = Some(ForcingSummary {
            forecast: build.forecast,
            gap_fill: build.gap_fill,
            source_counts,
            gauged_areas,
        });

        let reports = water_level_reports(water_levels, now);
        outcome.dispatch.sensor_uploads = plan_sensor_uploads(&reports);
        outcome.water_levels = reports;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::latch::LatchState;
    use crate::alert::thresholds::StaticImpactTable;
    use crate::config::ConfigError;
    use crate::ledger::MemoryLedgerStore;
    use crate::model::{RainfallPoint, ScenarioLabel, SourceTag};
    use chrono::{Duration, TimeZone};

    const CONFIG: &str = r#"
[trigger]
base_threshold = 20.0

[upstream]
MW10106 = ["MW10106"]
MW10104 = ["MW10104", "MW10501"]
MW10501 = ["MW10501"]

[severity_orders]
Karonga = ["10mm_12hr", "20mm_12hr", "30mm_12hr"]

[[regions]]
name = "karonga"
district = "Karonga"
members = ["MW10106", "MW10104"]
"#;

    fn config() -> PipelineConfig {
        PipelineConfig::from_toml_str(CONFIG).expect("test config is valid")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 6, 0, 0).unwrap()
    }

    fn label(s: &str) -> ScenarioLabel {
        s.parse().unwrap()
    }

    /// Twelve hours of 2.5 mm ending at `end`, then three dry forecast hours.
    fn storm(area: &str, end: DateTime<Utc>) -> AreaSeries {
        let wet = (0..12).map(|h| {
            RainfallPoint::new(end - Duration::hours(11 - h), Some(2.5), SourceTag::Archive)
        });
        let dry = (1..=3).map(|h| {
            RainfallPoint::new(end + Duration::hours(h), Some(0.0), SourceTag::PrimaryForecast)
        });
        AreaSeries::from_points(area, wet.chain(dry).collect::<Vec<_>>())
    }

    /// Zeros from five hours before `now` to three hours after.
    fn dry(area: &str, now: DateTime<Utc>) -> AreaSeries {
        AreaSeries::from_points(
            area,
            (-5..=3)
                .map(|h| RainfallPoint::new(now + Duration::hours(h), Some(0.0), SourceTag::Archive))
                .collect::<Vec<_>>(),
        )
    }

    fn impact() -> StaticImpactTable {
        let mut table = StaticImpactTable::new();
        table.insert("MW10106", label("30mm_12hr"), 50.0);
        table
    }

    #[test]
    fn test_storm_now_triggers_and_is_recorded() {
        let config = config();
        let impact = impact();
        let mut pipeline = FloodPipeline::new(&config, &impact, MemoryLedgerStore::new());

        let series: BTreeMap<_, _> = [("MW10106".to_string(), storm("MW10106", now()))].into();
        let outcome = pipeline.run(&series, now()).expect("run succeeds");

        let decision = &outcome.area_decisions["MW10106"];
        assert_eq!(decision.scenario, label("30mm_12hr"));
        assert_eq!(decision.lead_time_hours, 0);

        let region = &outcome.regions[0];
        assert!(region.decision.triggered);
        assert_eq!(region.state, LatchState::FreshlyTriggered);
        assert_eq!(outcome.dispatch.batches[0].lead_time_label, "0-hour");
        assert_eq!(pipeline.store().save_count(), 1);
    }

    #[test]
    fn test_confirmed_region_stays_latched_on_a_dry_run() {
        let config = config();
        let impact = impact();
        let mut pipeline = FloodPipeline::new(&config, &impact, MemoryLedgerStore::new());

        let wet: BTreeMap<_, _> = [("MW10106".to_string(), storm("MW10106", now()))].into();
        pipeline.run(&wet, now()).unwrap();

        let later = now() + Duration::days(4);
        let calm: BTreeMap<_, _> = [("MW10106".to_string(), dry("MW10106", later))].into();
        let outcome = pipeline.run(&calm, later).unwrap();

        assert!(outcome.area_decisions.is_empty());
        assert!(!outcome.assessments[0].decision.triggered, "fresh decision is calm");
        let region = &outcome.regions[0];
        assert_eq!(region.state, LatchState::LatchedHistoric);
        assert_eq!(region.decision.lead_time_hours, Some(0));
        assert_eq!(region.decision.events["MW10106"], label("30mm_12hr"));
        assert!(!outcome.dispatch.reset_portal);
        assert_eq!(pipeline.store().save_count(), 1, "a calm run appends nothing");
    }

    #[test]
    fn test_unmapped_area_is_fatal() {
        let config = config();
        let impact = impact();
        let pipeline = FloodPipeline::new(&config, &impact, MemoryLedgerStore::new());

        let series: BTreeMap<_, _> = [("MW99999".to_string(), dry("MW99999", now()))].into();
        let err = pipeline.decide_areas(&series, now()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ConfigError::UnknownArea(ref a)) if a == "MW99999"));
    }

    #[test]
    fn test_contributor_only_area_feeds_blend_but_is_not_ranked() {
        let config = config();
        let impact = impact();
        let pipeline = FloodPipeline::new(&config, &impact, MemoryLedgerStore::new());

        let series: BTreeMap<_, _> = [
            ("MW10104".to_string(), dry("MW10104", now())),
            ("MW10501".to_string(), storm("MW10501", now())),
        ]
        .into();
        let decisions = pipeline.decide_areas(&series, now()).unwrap();

        assert!(!decisions.contains_key("MW10501"));
        // mean of 0 and 30 mm over 12 h
        assert_eq!(decisions["MW10104"].scenario, label("20mm_12hr"));
    }

    #[test]
    fn test_unranked_scenario_aborts_run() {
        let config = PipelineConfig::from_toml_str(&CONFIG.replace(
            r#"["10mm_12hr", "20mm_12hr", "30mm_12hr"]"#,
            r#"["10mm_12hr", "20mm_12hr"]"#,
        ))
        .unwrap();
        let impact = impact();
        let mut pipeline = FloodPipeline::new(&config, &impact, MemoryLedgerStore::new());

        let series: BTreeMap<_, _> = [("MW10106".to_string(), storm("MW10106", now()))].into();
        let err = pipeline.run(&series, now()).unwrap_err();
        assert!(matches!(err, PipelineError::UnrankedScenario { .. }));
        assert_eq!(pipeline.store().save_count(), 0);
    }
}
