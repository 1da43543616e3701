/// Mapping of window totals onto scenario labels.
///
/// Each window has a bucket size, a cap, and for the two longest windows a
/// suppression rule that zeroes small totals. Rounding is half-to-even, so
/// 15 mm in 10 mm buckets rounds to 20 mm and 25 mm rounds to 20 mm.
///
/// Long-lag areas are only classified on the 12/24/48 h windows; the short
/// windows are dropped before classification so they cannot win the ranking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::analysis::rolling::WindowedSeries;
use crate::model::{ScenarioLabel, Window};

// ---------------------------------------------------------------------------
// Bucket rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Suppression {
    None,
    /// Zero the label when the capped, rounded depth equals this value.
    RoundedEquals(f64),
    /// Zero the label when the raw total is below this value.
    RawBelow(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRule {
    pub window: Window,
    pub bucket_mm: f64,
    pub cap_mm: f64,
    pub suppression: Suppression,
}

/// One rule per window, in `Window::ALL` order.
pub static BUCKET_RULES: [BucketRule; 6] = [
    BucketRule {
        window: Window::H1,
        bucket_mm: 10.0,
        cap_mm: 50.0,
        suppression: Suppression::None,
    },
    BucketRule {
        window: Window::H2,
        bucket_mm: 10.0,
        cap_mm: 70.0,
        suppression: Suppression::None,
    },
    BucketRule {
        window: Window::H4,
        bucket_mm: 10.0,
        cap_mm: 80.0,
        suppression: Suppression::None,
    },
    BucketRule {
        window: Window::H12,
        bucket_mm: 10.0,
        cap_mm: 100.0,
        suppression: Suppression::None,
    },
    BucketRule {
        window: Window::H24,
        bucket_mm: 25.0,
        cap_mm: 200.0,
        suppression: Suppression::RoundedEquals(25.0),
    },
    BucketRule {
        window: Window::H48,
        bucket_mm: 50.0,
        cap_mm: 200.0,
        suppression: Suppression::RawBelow(37.5),
    },
];

pub fn rule_for(window: Window) -> &'static BucketRule {
    &BUCKET_RULES[window.index()]
}

impl BucketRule {
    pub fn classify(&self, total_mm: Option<f64>) -> ScenarioLabel {
        let raw = match total_mm {
            Some(v) if v.is_finite() => v.max(0.0),
            _ => return ScenarioLabel::no_event(self.window),
        };
        let depth = ((raw / self.bucket_mm).round_ties_even() * self.bucket_mm).min(self.cap_mm);
        let suppressed = match self.suppression {
            Suppression::None => false,
            Suppression::RoundedEquals(value) => depth == value,
            Suppression::RawBelow(limit) => raw < limit,
        };
        if suppressed {
            ScenarioLabel::no_event(self.window)
        } else {
            ScenarioLabel::new(depth as u32, self.window)
        }
    }

    /// Every label this rule can emit, no-event included.
    pub fn possible_labels(&self) -> Vec<ScenarioLabel> {
        let steps = (self.cap_mm / self.bucket_mm) as u32;
        (0..=steps)
            .map(|i| self.classify(Some(f64::from(i) * self.bucket_mm)))
            .fold(Vec::new(), |mut labels, label| {
                if !labels.contains(&label) {
                    labels.push(label);
                }
                labels
            })
    }
}

pub fn classify(window: Window, total_mm: Option<f64>) -> ScenarioLabel {
    rule_for(window).classify(total_mm)
}

// ---------------------------------------------------------------------------
// Series classification
// ---------------------------------------------------------------------------

pub const LONG_LAG_WINDOWS: [Window; 3] = [Window::H12, Window::H24, Window::H48];

/// Windows an area is classified on.
pub fn retained_windows(short_lag: bool) -> &'static [Window] {
    if short_lag {
        &Window::ALL
    } else {
        &LONG_LAG_WINDOWS
    }
}

/// Labels per timestamp; `rows[t][i]` belongs to `windows[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSeries {
    pub area: String,
    pub windows: Vec<Window>,
    pub rows: BTreeMap<DateTime<Utc>, Vec<ScenarioLabel>>,
}

pub fn classify_series(series: &WindowedSeries, short_lag: bool) -> ClassifiedSeries {
    let windows = retained_windows(short_lag).to_vec();
    let rows = series
        .rows
        .iter()
        .map(|(timestamp, sums)| {
            let labels = windows
                .iter()
                .map(|w| classify(*w, sums[w.index()]))
                .collect();
            (*timestamp, labels)
        })
        .collect();
    ClassifiedSeries {
        area: series.area.clone(),
        windows,
        rows,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn depth(window: Window, mm: f64) -> u32 {
        classify(window, Some(mm)).depth_mm
    }

    #[test]
    fn test_rules_are_indexed_by_window() {
        for window in Window::ALL {
            assert_eq!(rule_for(window).window, window);
        }
    }

    #[test]
    fn test_short_windows_round_to_ten_and_cap() {
        assert_eq!(depth(Window::H1, 4.9), 0);
        assert_eq!(depth(Window::H1, 5.0), 0, "5.0 rounds half-to-even down to 0");
        assert_eq!(depth(Window::H1, 15.0), 20, "1.5 rounds half-to-even up to 2");
        assert_eq!(depth(Window::H1, 25.0), 20, "2.5 rounds half-to-even down to 2");
        assert_eq!(depth(Window::H1, 400.0), 50);
        assert_eq!(depth(Window::H2, 400.0), 70);
        assert_eq!(depth(Window::H4, 400.0), 80);
        assert_eq!(depth(Window::H12, 400.0), 100);
        assert_eq!(depth(Window::H12, 31.0), 30);
    }

    #[test]
    fn test_24h_suppresses_the_25mm_bucket() {
        assert_eq!(depth(Window::H24, 20.0), 0);
        assert_eq!(depth(Window::H24, 26.0), 0);
        assert_eq!(depth(Window::H24, 40.0), 50);
        assert_eq!(depth(Window::H24, 62.5), 50, "2.5 rounds half-to-even down to 2");
        assert_eq!(depth(Window::H24, 900.0), 200);
    }

    #[test]
    fn test_48h_suppresses_totals_below_37_5() {
        assert_eq!(depth(Window::H48, 30.0), 0);
        assert_eq!(depth(Window::H48, 37.4), 0);
        assert_eq!(depth(Window::H48, 40.0), 50);
        assert_eq!(depth(Window::H48, 1000.0), 200);
    }

    #[test]
    fn test_missing_or_negative_totals_are_no_event() {
        assert!(classify(Window::H12, None).is_no_event());
        assert!(classify(Window::H12, Some(f64::NAN)).is_no_event());
        assert!(classify(Window::H4, Some(-3.0)).is_no_event());
    }

    #[test]
    fn test_possible_labels_cover_capped_buckets() {
        let labels: Vec<String> = rule_for(Window::H24)
            .possible_labels()
            .iter()
            .map(|l| l.to_string())
            .collect();
        assert_eq!(
            labels,
            vec!["0mm_24hr", "50mm_24hr", "75mm_24hr", "100mm_24hr", "125mm_24hr", "150mm_24hr", "175mm_24hr", "200mm_24hr"]
        );
    }

    #[test]
    fn test_long_lag_series_drops_short_windows() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut rows = BTreeMap::new();
        rows.insert(t, [Some(45.0), Some(60.0), Some(60.0), Some(60.0), Some(60.0), Some(60.0)]);
        let series = WindowedSeries { area: "MW10106".into(), rows };

        let long = classify_series(&series, false);
        assert_eq!(long.windows, LONG_LAG_WINDOWS.to_vec());
        assert_eq!(long.rows[&t].len(), 3);
        assert!(long.rows[&t].iter().all(|l| l.window >= Window::H12));

        let short = classify_series(&series, true);
        assert_eq!(short.rows[&t][0].to_string(), "40mm_1hr");
    }
}
