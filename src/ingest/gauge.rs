/// Field rain-gauge overlay.
///
/// Tipping-bucket gauges report a running counter. Where a gauge has data it
/// is more trustworthy than any model, so its increments replace the forcing
/// series over the gauge's observation window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AreaSeries, RainfallPoint, SourceTag};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub timestamp: DateTime<Utc>,
    /// Running total since the counter was last reset.
    pub counter_mm: f64,
}

/// Converts counter readings into per-step increments.
///
/// The first reading only sets the baseline: nothing was measured before it,
/// so it yields no point. A drop in the counter means it was reset, and the
/// new counter value is the increment.
pub fn gauge_increments(readings: &[GaugeReading]) -> Vec<RainfallPoint> {
    let mut readings = readings.to_vec();
    readings.sort_by_key(|r| r.timestamp);
    readings.dedup_by_key(|r| r.timestamp);

    readings
        .windows(2)
        .map(|pair| {
            let (prev, reading) = (pair[0].counter_mm, pair[1].counter_mm);
            let increment = if reading < prev { reading } else { reading - prev };
            RainfallPoint::new(pair[1].timestamp, Some(increment), SourceTag::Gauge)
        })
        .collect()
}

/// Replaces forcing inside `(gauge_first, gauge_last]` with gauge data.
///
/// `gauge` holds increments, so `gauge_first` is the end of the first
/// measured step; the gauge point wins there. Forcing at the baseline
/// reading before it is untouched.
pub fn overlay_gauge(series: &AreaSeries, gauge: &[RainfallPoint]) -> AreaSeries {
    let (Some(first), Some(last)) = (gauge.first(), gauge.last()) else {
        return series.clone();
    };
    let (start, end) = (first.timestamp, last.timestamp);

    let kept = series
        .points()
        .iter()
        .filter(|p| !(p.timestamp > start && p.timestamp <= end))
        .copied();
    let merged = gauge
        .iter()
        .map(|p| RainfallPoint::new(p.timestamp, p.precipitation_mm, SourceTag::Gauge))
        .chain(kept);
    AreaSeries::from_points(series.area.clone(), merged)
}
