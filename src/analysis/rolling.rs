/// Trailing-window rainfall totals and upstream blending.
///
/// For every timestamp of an area's series the aggregator computes the total
/// rain over each of the six trailing windows. Windows are half-open,
/// `(t - w, t]`, so at a regular sampling interval a window of `w` hours
/// contains exactly `w / interval` samples.
///
/// Blending then replaces each area's totals with the mean over the area and
/// everything upstream of it. Blending always reads the un-blended totals, so
/// the result does not depend on the order areas are visited in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::config::{ConfigError, PipelineConfig};
use crate::logging::{self, Stage};
use crate::model::{AreaSeries, RainfallPoint, Window};

/// One total per window, indexed by `Window::index`.
/// `None` when no sample with a value falls inside the window.
pub type WindowSums = [Option<f64>; 6];

#[derive(Debug, Clone, PartialEq)]
pub struct WindowedSeries {
    pub area: String,
    pub rows: BTreeMap<DateTime<Utc>, WindowSums>,
}

impl WindowedSeries {
    pub fn value(&self, timestamp: DateTime<Utc>, window: Window) -> Option<f64> {
        self.rows
            .get(&timestamp)
            .and_then(|sums| sums[window.index()])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rolling sums
// ---------------------------------------------------------------------------

/// Trailing totals over one window for every point of a time-ordered slice.
pub fn trailing_sums(points: &[RainfallPoint], window: Window) -> Vec<Option<f64>> {
    let mut sums = Vec::with_capacity(points.len());
    let mut start = 0;
    for (i, point) in points.iter().enumerate() {
        let lower = point.timestamp - window.duration();
        while points[start].timestamp <= lower {
            start += 1;
        }
        let mut present = points[start..=i]
            .iter()
            .filter_map(|p| p.precipitation_mm)
            .peekable();
        sums.push(present.peek().is_some().then(|| present.sum()));
    }
    sums
}

/// All six window totals for an area.
pub fn rolling_sums(series: &AreaSeries) -> WindowedSeries {
    let points = series.points();
    let mut rows: BTreeMap<DateTime<Utc>, WindowSums> = points
        .iter()
        .map(|p| (p.timestamp, [None; 6]))
        .collect();

    for window in Window::ALL {
        for (point, total) in points.iter().zip(trailing_sums(points, window)) {
            if let Some(sums) = rows.get_mut(&point.timestamp) {
                sums[window.index()] = total;
            }
        }
    }

    WindowedSeries {
        area: series.area.clone(),
        rows,
    }
}

// ---------------------------------------------------------------------------
// Upstream blending
// ---------------------------------------------------------------------------

/// Mean of the contributors' totals, per timestamp and window.
///
/// Timestamps are the union over contributors. A contributor with no value at
/// a timestamp is left out of that mean rather than counted as zero.
pub fn blend_area(area: &str, contributors: &[&WindowedSeries]) -> WindowedSeries {
    let timestamps: BTreeSet<DateTime<Utc>> = contributors
        .iter()
        .flat_map(|c| c.rows.keys().copied())
        .collect();

    let rows = timestamps
        .into_iter()
        .map(|timestamp| {
            let mut sums: WindowSums = [None; 6];
            for window in Window::ALL {
                let values: Vec<f64> = contributors
                    .iter()
                    .filter_map(|c| c.value(timestamp, window))
                    .collect();
                if !values.is_empty() {
                    sums[window.index()] = Some(values.iter().sum::<f64>() / values.len() as f64);
                }
            }
            (timestamp, sums)
        })
        .collect();

    WindowedSeries {
        area: area.to_string(),
        rows,
    }
}

/// Blends every rolled area with its upstream contributors.
///
/// Contributors without a series this run are skipped with a debug log.
pub fn blend_upstream(
    rolled: &BTreeMap<String, WindowedSeries>,
    config: &PipelineConfig,
) -> Result<BTreeMap<String, WindowedSeries>, ConfigError> {
    let mut blended = BTreeMap::new();
    for area in rolled.keys() {
        let mut contributors = Vec::new();
        for upstream in config.upstream_of(area)? {
            match rolled.get(upstream) {
                Some(series) => contributors.push(series),
                None => logging::debug(
                    Stage::Aggregation,
                    Some(area.as_str()),
                    &format!("upstream area {} has no series this run", upstream),
                ),
            }
        }
        blended.insert(area.clone(), blend_area(area, &contributors));
    }
    Ok(blended)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceTag;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn hourly(area: &str, values: &[Option<f64>]) -> AreaSeries {
        AreaSeries::from_points(
            area,
            values.iter().enumerate().map(|(h, v)| {
                RainfallPoint::new(start() + Duration::hours(h as i64), *v, SourceTag::Archive)
            }),
        )
    }

    #[test]
    fn test_hourly_window_of_two_sums_exactly_two_samples() {
        let series = hourly("A", &[Some(1.0), Some(2.0), Some(4.0), Some(8.0)]);
        let rolled = rolling_sums(&series);
        let at = |h: i64| start() + Duration::hours(h);
        assert_eq!(rolled.value(at(0), Window::H2), Some(1.0));
        assert_eq!(rolled.value(at(1), Window::H2), Some(3.0));
        assert_eq!(rolled.value(at(3), Window::H2), Some(12.0));
        assert_eq!(rolled.value(at(3), Window::H1), Some(8.0));
        assert_eq!(rolled.value(at(3), Window::H4), Some(15.0));
    }

    #[test]
    fn test_sample_exactly_one_window_back_is_excluded() {
        let series = hourly("A", &[Some(5.0), Some(5.0), Some(5.0)]);
        let rolled = rolling_sums(&series);
        let at = |h: i64| start() + Duration::hours(h);
        assert_eq!(
            rolled.value(at(2), Window::H1),
            Some(5.0),
            "the sample at t - 1h belongs to the previous hour"
        );
        assert_eq!(rolled.value(at(2), Window::H2), Some(10.0));
    }

    #[test]
    fn test_half_hourly_samples_fill_an_hour_with_two_points() {
        let series = AreaSeries::from_points(
            "A",
            (0..4).map(|i| {
                RainfallPoint::new(start() + Duration::minutes(30 * i), Some(1.5), SourceTag::Archive)
            }),
        );
        let rolled = rolling_sums(&series);
        assert_eq!(rolled.value(start() + Duration::minutes(90), Window::H1), Some(3.0));
    }

    #[test]
    fn test_window_without_present_samples_is_none() {
        let series = hourly("A", &[Some(2.0), None, None]);
        let rolled = rolling_sums(&series);
        let at = |h: i64| start() + Duration::hours(h);
        assert_eq!(rolled.value(at(1), Window::H1), None);
        assert_eq!(rolled.value(at(2), Window::H2), None);
        assert_eq!(rolled.value(at(2), Window::H4), Some(2.0));
    }

    #[test]
    fn test_blending_with_only_self_leaves_totals_unchanged() {
        let series = hourly("A", &[Some(1.0), Some(3.5), None, Some(0.25)]);
        let rolled = rolling_sums(&series);
        let blended = blend_area("A", &[&rolled]);
        assert_eq!(blended, rolled);
    }

    #[test]
    fn test_blending_averages_contributors_and_skips_missing_values() {
        let a = rolling_sums(&hourly("A", &[Some(2.0), Some(2.0)]));
        let b = rolling_sums(&hourly("B", &[Some(6.0), None]));
        let blended = blend_area("A", &[&a, &b]);
        let at = |h: i64| start() + Duration::hours(h);
        assert_eq!(blended.value(at(0), Window::H1), Some(4.0));
        // B has no value in (0h, 1h]
        assert_eq!(blended.value(at(1), Window::H1), Some(2.0));
        assert_eq!(blended.value(at(1), Window::H2), Some(5.0));
    }
}
