/// Forcing time-series assembly.
///
/// Joins the observed satellite archive with a forecast into one continuous,
/// source-tagged rainfall series per area. The GIS collaborator delivers
/// every source already reduced to one value per area per timestamp; this
/// module only decides which sources to use, normalises them to hourly
/// increments and stitches them together.
///
/// Assembly precedence on equal timestamps: archive > gap fill > forecast.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::stalenesses::{age_minutes, is_stale_at};
use crate::config::ForcingSettings;
use crate::logging::{self, Stage};
use crate::model::{AreaSeries, PipelineError, RainfallPoint, SourceError, SourceTag};

// ---------------------------------------------------------------------------
// Raw source data
// ---------------------------------------------------------------------------

/// How a source expresses rainfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// Each value is the amount fallen since the previous sample.
    Incremental,
    /// Each value is the total since the start of the model run.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// One area's series as delivered by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub accumulation: Accumulation,
    pub samples: Vec<RawSample>,
}

/// A source's output for one run: area code → series.
pub type ModelRun = BTreeMap<String, RawSeries>;

impl RawSeries {
    /// Normalises to tagged hourly-or-finer increments.
    ///
    /// Samples are sorted, implausible magnitudes clipped to missing, then
    /// cumulative values differenced and coarse steps spread over hours.
    pub fn to_points(&self, source: SourceTag, max_plausible_mm: f64) -> Vec<RainfallPoint> {
        let mut samples = self.samples.clone();
        samples.sort_by_key(|s| s.timestamp);
        samples.dedup_by_key(|s| s.timestamp);
        let clipped = clip_implausible(&samples, max_plausible_mm);
        let increments = match self.accumulation {
            Accumulation::Incremental => clipped,
            Accumulation::Cumulative => to_increments(&clipped),
        };
        spread_to_hourly(&increments)
            .into_iter()
            .map(|s| RainfallPoint::new(s.timestamp, s.value, source))
            .collect()
    }
}

/// Values above `max_mm` become missing.
pub fn clip_implausible(samples: &[RawSample], max_mm: f64) -> Vec<RawSample> {
    samples
        .iter()
        .map(|s| RawSample {
            timestamp: s.timestamp,
            value: s.value.filter(|v| *v <= max_mm),
        })
        .collect()
}

/// First difference of a cumulative series; the first sample keeps its value.
///
/// A difference involving a missing sample is itself missing.
pub fn to_increments(samples: &[RawSample]) -> Vec<RawSample> {
    samples
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let value = if i == 0 {
                s.value
            } else {
                match (samples[i - 1].value, s.value) {
                    (Some(prev), Some(curr)) => Some(curr - prev),
                    _ => None,
                }
            };
            RawSample {
                timestamp: s.timestamp,
                value,
            }
        })
        .collect()
}

/// Spreads samples whose step is a whole number of hours (>1) evenly over
/// hourly slots ending at the sample. The first sample is emitted unchanged.
pub fn spread_to_hourly(samples: &[RawSample]) -> Vec<RawSample> {
    let mut out = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        let Some(prev) = i.checked_sub(1).map(|p| samples[p]) else {
            out.push(*sample);
            continue;
        };
        let step = sample.timestamp - prev.timestamp;
        let hours = step.num_hours();
        if hours <= 1 || step != Duration::hours(hours) {
            out.push(*sample);
            continue;
        }
        let share = sample.value.map(|v| v / hours as f64);
        for back in (0..hours).rev() {
            out.push(RawSample {
                timestamp: sample.timestamp - Duration::hours(back),
                value: share,
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Forecast sources
// ---------------------------------------------------------------------------

/// Access to the forecast models, implemented by the data-download collaborator.
pub trait ForecastProvider {
    /// Issue date of the most recent primary (regional) model run, if any.
    fn latest_primary_issue(&self) -> Option<NaiveDate>;

    fn primary_issue_available(&self, issue: NaiveDate) -> bool;

    fn fetch_primary(&self, issue: NaiveDate) -> Result<ModelRun, SourceError>;

    /// Global model run covering `reference`; always expected to resolve.
    fn fetch_fallback(&self, reference: DateTime<Utc>) -> Result<ModelRun, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ForecastChoice {
    Primary { issue: NaiveDate },
    Fallback,
}

/// Today's primary run; yesterday's before the cutoff hour; else the fallback.
pub fn select_forecast_source(
    latest_primary: Option<NaiveDate>,
    now: DateTime<Utc>,
    cutoff_hour_utc: u32,
) -> ForecastChoice {
    let today = now.date_naive();
    match latest_primary {
        Some(issue) if issue == today => ForecastChoice::Primary { issue },
        Some(issue) if Some(issue) == today.pred_opt() && now.hour() < cutoff_hour_utc => {
            ForecastChoice::Primary { issue }
        }
        _ => ForecastChoice::Fallback,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GapFillOutcome {
    NotNeeded,
    Filled {
        source: ForecastChoice,
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForcingBuild {
    pub series: BTreeMap<String, AreaSeries>,
    pub forecast: ForecastChoice,
    pub gap_fill: GapFillOutcome,
}

pub struct ForcingTimeseriesBuilder<'a> {
    settings: &'a ForcingSettings,
}

impl<'a> ForcingTimeseriesBuilder<'a> {
    pub fn new(settings: &'a ForcingSettings) -> Self {
        Self { settings }
    }

    /// Resolves and fetches the forecast, failing over to the fallback model
    /// when the selected primary run cannot be read.
    fn fetch_forecast(
        &self,
        provider: &dyn ForecastProvider,
        now: DateTime<Utc>,
    ) -> Result<(ForecastChoice, ModelRun), PipelineError> {
        let choice = select_forecast_source(
            provider.latest_primary_issue(),
            now,
            self.settings.primary_cutoff_hour_utc,
        );

        if let ForecastChoice::Primary { issue } = choice {
            match provider.fetch_primary(issue) {
                Ok(run) => {
                    logging::info(
                        Stage::Forcing,
                        None,
                        &format!("using primary forecast issued {}", issue),
                    );
                    return Ok((choice, run));
                }
                Err(e) => logging::log_source_failure(Stage::Forcing, None, "primary forecast", &e),
            }
        } else {
            logging::info(Stage::Forcing, None, "no eligible primary forecast, switching to fallback");
        }

        provider
            .fetch_fallback(now)
            .map(|run| (ForecastChoice::Fallback, run))
            .map_err(PipelineError::NoForecastSource)
    }

    /// Fetches gap-fill points per area for `(archive_last, forecast_first]`.
    fn fetch_gap(
        &self,
        provider: &dyn ForecastProvider,
        archive_last: DateTime<Utc>,
        forecast_first: DateTime<Utc>,
    ) -> (GapFillOutcome, BTreeMap<String, Vec<RainfallPoint>>) {
        let gap_start = archive_last + Duration::minutes(self.settings.archive_interval_minutes);
        let gap_day = gap_start.date_naive();

        let (source, fetched) = if provider.primary_issue_available(gap_day) {
            (
                ForecastChoice::Primary { issue: gap_day },
                provider.fetch_primary(gap_day),
            )
        } else {
            (ForecastChoice::Fallback, provider.fetch_fallback(gap_start))
        };

        match fetched {
            Ok(run) => {
                logging::info(
                    Stage::Forcing,
                    None,
                    &format!("filling gap {} .. {} with {:?}", gap_start, forecast_first, source),
                );
                let points = run
                    .iter()
                    .map(|(area, raw)| {
                        let kept = raw
                            .to_points(SourceTag::GapFill, self.settings.max_plausible_mm)
                            .into_iter()
                            .filter(|p| p.timestamp > archive_last && p.timestamp <= forecast_first)
                            .collect();
                        (area.clone(), kept)
                    })
                    .collect();
                (
                    GapFillOutcome::Filled {
                        source,
                        gap_start,
                        gap_end: forecast_first,
                    },
                    points,
                )
            }
            Err(e) => {
                logging::log_source_failure(Stage::Forcing, None, "gap fill", &e);
                (
                    GapFillOutcome::Failed {
                        reason: e.to_string(),
                    },
                    BTreeMap::new(),
                )
            }
        }
    }

    /// Builds one series per area from the archive and the resolved forecast.
    pub fn build(
        &self,
        provider: &dyn ForecastProvider,
        archive: &ModelRun,
        now: DateTime<Utc>,
    ) -> Result<ForcingBuild, PipelineError> {
        let max_mm = self.settings.max_plausible_mm;
        let (forecast, forecast_run) = self.fetch_forecast(provider, now)?;

        let archive_points: BTreeMap<String, Vec<RainfallPoint>> = archive
            .iter()
            .map(|(area, raw)| (area.clone(), raw.to_points(SourceTag::Archive, max_mm)))
            .collect();
        let forecast_tag = match forecast {
            ForecastChoice::Primary { .. } => SourceTag::PrimaryForecast,
            ForecastChoice::Fallback => SourceTag::FallbackForecast,
        };
        let forecast_points: BTreeMap<String, Vec<RainfallPoint>> = forecast_run
            .iter()
            .map(|(area, raw)| (area.clone(), raw.to_points(forecast_tag, max_mm)))
            .collect();

        let archive_last = archive_points
            .values()
            .filter_map(|points| points.last().map(|p| p.timestamp))
            .max();
        let forecast_first = forecast_points
            .values()
            .filter_map(|points| points.first().map(|p| p.timestamp))
            .min();

        if let Some(last) = archive_last {
            if is_stale_at(last, self.settings.archive_max_age_minutes, now) {
                logging::warn(
                    Stage::Forcing,
                    None,
                    &format!(
                        "archive ends at {} ({} minutes old), forecast will carry more of the series",
                        last,
                        age_minutes(last, now)
                    ),
                );
            }
        }

        let (gap_fill, gap_points) = match (archive_last, forecast_first) {
            (Some(last), Some(first))
                if last + Duration::minutes(self.settings.archive_interval_minutes) < first =>
            {
                self.fetch_gap(provider, last, first)
            }
            _ => (GapFillOutcome::NotNeeded, BTreeMap::new()),
        };

        let areas: BTreeSet<&String> = archive_points.keys().chain(forecast_points.keys()).collect();
        let mut series = BTreeMap::new();
        let mut complete = 0;
        for area in areas {
            let observed = archive_points.get(area.as_str());
            let predicted = forecast_points.get(area.as_str());
            match (observed, predicted) {
                (None, _) => logging::warn(Stage::Forcing, Some(area.as_str()), "no archive data for area"),
                (_, None) => logging::warn(Stage::Forcing, Some(area.as_str()), "no forecast data for area"),
                _ => complete += 1,
            }

            let area_last = observed.and_then(|points| points.last().map(|p| p.timestamp));
            let mut points: Vec<RainfallPoint> = observed.cloned().unwrap_or_default();
            if let Some(gap) = gap_points.get(area.as_str()) {
                points.extend(gap.iter().copied());
            }
            if let Some(predicted) = predicted {
                points.extend(
                    predicted
                        .iter()
                        .filter(|p| area_last.is_none_or(|last| p.timestamp > last))
                        .copied(),
                );
            }
            series.insert(area.clone(), AreaSeries::from_points(area.as_str(), points));
        }

        logging::log_stage_summary(Stage::Forcing, series.len(), complete, series.len() - complete);

        Ok(ForcingBuild {
            series,
            forecast,
            gap_fill,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
