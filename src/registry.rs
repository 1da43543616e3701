/// Built-in area registry for the Malawi flash-flood service.
///
/// Defines the traditional authorities (TAs) grouped into alert regions,
/// the hydrological upstream map, the fast-runoff areas and the curated
/// severity order. This is the default configuration used when no config
/// file is supplied; `default_config` turns these tables into a validated
/// `PipelineConfig`.

use std::collections::BTreeMap;

use crate::analysis::severity::SeverityOrder;
use crate::config::{
    ConfigError, ForcingSettings, LedgerSettings, PipelineConfig, RegionConfig, TriggerSettings,
};
use crate::model::ScenarioLabel;

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

/// An alert region: a set of TAs that are uploaded and latched together.
pub struct Region {
    /// Key used in the ledger and in uploads.
    pub name: &'static str,
    /// District whose severity order ranks the region's TAs.
    pub district: &'static str,
    pub description: &'static str,
    pub members: &'static [&'static str],
}

pub static REGION_REGISTRY: &[Region] = &[
    Region {
        name: "karonga",
        district: "Karonga",
        description: "Lakeshore TAs along the lower Lufira and North Rukuru. \
                      Flooding follows multi-day rain over the escarpment.",
        members: &["MW10106", "MW10104", "MW10203", "MW10220"],
    },
    Region {
        name: "rumphi",
        district: "Rumphi",
        description: "South Rukuru catchment. Receives runoff from the Mzimba \
                      TAs upstream, which are tracked as contributors only.",
        members: &[
            "MW10420", "MW10403", "MW10404", "MW10407", "MW10401", "MW10402", "MW10511",
            "MW10411",
        ],
    },
    Region {
        name: "blantyre",
        district: "Blantyre City",
        description: "Urban wards. Paved catchments respond within hours, so \
                      every ward is a short-lag area.",
        members: &[
            "MW31546", "MW31545", "MW31541", "MW31548", "MW31552", "MW31540", "MW31549",
            "MW31543", "MW31533", "MW31539", "MW31531", "MW31553", "MW31544", "MW31542",
            "MW31551", "MW31537", "MW31536", "MW31535", "MW31534", "MW31538", "MW31547",
            "MW31550", "MW31532",
        ],
    },
];

// ---------------------------------------------------------------------------
// Hydrology
// ---------------------------------------------------------------------------

/// Area → the area itself plus every TA draining into it.
///
/// Areas appearing only as contributors (MW104xx/MW105xx in Mzimba) have no
/// region and are never ranked.
pub static UPSTREAM_REGISTRY: &[(&str, &[&str])] = &[
    ("MW10106", &["MW10106"]),
    ("MW10104", &["MW10104", "MW10106"]),
    ("MW10203", &["MW10203", "MW10104", "MW10106"]),
    ("MW10220", &["MW10220", "MW10203", "MW10104", "MW10106"]),
    ("MW10410", &["MW10410"]),
    ("MW10411", &["MW10411"]),
    ("MW10503", &["MW10503"]),
    ("MW10506", &["MW10506"]),
    ("MW10502", &["MW10502", "MW10503"]),
    ("MW10520", &["MW10520", "MW10506"]),
    ("MW10510", &["MW10510", "MW10506"]),
    ("MW10501", &["MW10501", "MW10510", "MW10506", "MW10520"]),
    ("MW10505", &["MW10505", "MW10501", "MW10506", "MW10510", "MW10520"]),
    ("MW10511", &["MW10511", "MW10411"]),
    (
        "MW10509",
        &[
            "MW10509", "MW10505", "MW10501", "MW10506", "MW10510", "MW10520", "MW10511",
            "MW10411",
        ],
    ),
    (
        "MW10401",
        &[
            "MW10401", "MW10509", "MW10505", "MW10501", "MW10506", "MW10510", "MW10520",
            "MW10511", "MW10411",
        ],
    ),
    (
        "MW10420",
        &[
            "MW10420", "MW10410", "MW10401", "MW10509", "MW10505", "MW10501", "MW10506",
            "MW10510", "MW10520", "MW10511", "MW10411",
        ],
    ),
    (
        "MW10504",
        &[
            "MW10504", "MW10502", "MW10503", "MW10420", "MW10410", "MW10401", "MW10509",
            "MW10505", "MW10501", "MW10506", "MW10510", "MW10520", "MW10511", "MW10411",
        ],
    ),
    (
        "MW10407",
        &[
            "MW10407", "MW10504", "MW10502", "MW10503", "MW10420", "MW10410", "MW10401",
            "MW10509", "MW10505", "MW10501", "MW10506", "MW10510", "MW10520", "MW10511",
            "MW10411",
        ],
    ),
    ("MW10403", &["MW10403"]),
    ("MW10404", &["MW10404"]),
    (
        "MW10402",
        &[
            "MW10402", "MW10404", "MW10403", "MW10407", "MW10504", "MW10502", "MW10503",
            "MW10420", "MW10410", "MW10401", "MW10509", "MW10505", "MW10501", "MW10506",
            "MW10510", "MW10520", "MW10511", "MW10411",
        ],
    ),
];

/// TAs with a short rainfall-to-flood lag; classified on all six windows.
pub static SHORT_LAG_AREAS: &[&str] = &["MW10420", "MW10407"];

/// Hours from now at which forecast rows are considered for ranking.
pub static LEAD_TIME_CHECKPOINTS: &[i64] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 15, 18, 21, 24, 48];

/// Scenario labels, least to most severe. Shared by all three districts.
pub static EVENT_SEVERITY_ORDER: &[&str] = &[
    "5mm_1hr", "10mm_12hr", "10mm_4hr", "10mm_2hr", "20mm_12hr", "20mm_4hr", "10mm_1hr",
    "20mm_2hr", "15mm_1hr", "30mm_12hr", "50mm_48hr", "50mm_24hr", "30mm_4hr", "30mm_2hr",
    "20mm_1hr", "25mm_1hr", "40mm_12hr", "40mm_4hr", "40mm_2hr", "30mm_1hr", "75mm_24hr",
    "100mm_48hr", "50mm_12hr", "60mm_12hr", "50mm_4hr", "50mm_2hr", "35mm_1hr", "40mm_1hr",
    "100mm_24hr", "70mm_12hr", "80mm_12hr", "60mm_4hr", "60mm_2hr", "45mm_1hr", "50mm_1hr",
    "90mm_12hr", "70mm_4hr", "70mm_2hr", "80mm_4hr", "125mm_24hr", "150mm_48hr", "100mm_12hr",
    "150mm_24hr", "175mm_24hr", "200mm_48hr", "200mm_24hr",
];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn find_region(name: &str) -> Option<&'static Region> {
    REGION_REGISTRY.iter().find(|r| r.name == name)
}

/// Region an area belongs to, `None` for contributor-only areas.
pub fn region_for_area(area: &str) -> Option<&'static Region> {
    REGION_REGISTRY.iter().find(|r| r.members.contains(&area))
}

/// Every area code known to the upstream map, members and contributors alike.
pub fn all_area_codes() -> Vec<&'static str> {
    let mut codes: Vec<&'static str> = UPSTREAM_REGISTRY.iter().map(|(code, _)| *code).collect();
    for region in REGION_REGISTRY {
        for member in region.members {
            if !codes.contains(member) {
                codes.push(member);
            }
        }
    }
    codes
}

fn severity_order() -> Result<SeverityOrder, ConfigError> {
    let labels = EVENT_SEVERITY_ORDER
        .iter()
        .map(|s| s.parse::<ScenarioLabel>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::InvalidSeverityOrder(e.to_string()))?;
    SeverityOrder::new(labels)
}

/// The registry as a validated pipeline configuration.
pub fn default_config() -> Result<PipelineConfig, ConfigError> {
    let mut upstream: BTreeMap<String, Vec<String>> = UPSTREAM_REGISTRY
        .iter()
        .map(|(area, contributors)| {
            (
                area.to_string(),
                contributors.iter().map(|c| c.to_string()).collect(),
            )
        })
        .collect();

    let mut short_lag_areas: std::collections::BTreeSet<String> =
        SHORT_LAG_AREAS.iter().map(|a| a.to_string()).collect();

    // urban wards drain only themselves and all respond fast
    if let Some(blantyre) = find_region("blantyre") {
        for ward in blantyre.members {
            upstream
                .entry(ward.to_string())
                .or_insert_with(|| vec![ward.to_string()]);
            short_lag_areas.insert(ward.to_string());
        }
    }

    let order = severity_order()?;
    let severity_orders = REGION_REGISTRY
        .iter()
        .map(|r| (r.district.to_string(), order.clone()))
        .collect();

    let regions = REGION_REGISTRY
        .iter()
        .map(|r| RegionConfig {
            name: r.name.to_string(),
            district: r.district.to_string(),
            members: r.members.iter().map(|m| m.to_string()).collect(),
            description: r.description.to_string(),
            threshold_overrides: BTreeMap::new(),
        })
        .collect();

    let config = PipelineConfig {
        lead_time_checkpoints: LEAD_TIME_CHECKPOINTS.to_vec(),
        short_lag_areas,
        trigger: TriggerSettings::default(),
        forcing: ForcingSettings::default(),
        ledger: LedgerSettings::default(),
        threshold_corrections: BTreeMap::new(),
        upstream,
        severity_orders,
        regions,
    };
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify::{retained_windows, rule_for};
    use std::collections::HashSet;

    #[test]
    fn test_area_codes_share_the_mw_prefix_format() {
        for code in all_area_codes() {
            assert_eq!(code.len(), 7, "area code '{}' should be 7 characters", code);
            assert!(code.starts_with("MW"), "area code '{}' should start with MW", code);
            assert!(
                code[2..].chars().all(|c| c.is_ascii_digit()),
                "area code '{}' should end in digits",
                code
            );
        }
    }

    #[test]
    fn test_no_area_belongs_to_two_regions() {
        let mut seen = HashSet::new();
        for region in REGION_REGISTRY {
            for member in region.members {
                assert!(
                    seen.insert(*member),
                    "area '{}' appears in more than one region",
                    member
                );
            }
        }
    }

    #[test]
    fn test_upstream_lists_start_with_the_area_itself() {
        for (area, contributors) in UPSTREAM_REGISTRY {
            assert_eq!(
                contributors.first(),
                Some(area),
                "upstream list of '{}' should start with itself",
                area
            );
        }
    }

    #[test]
    fn test_upstream_contributors_are_known_areas() {
        let known: HashSet<&str> = UPSTREAM_REGISTRY.iter().map(|(a, _)| *a).collect();
        for (area, contributors) in UPSTREAM_REGISTRY {
            for contributor in *contributors {
                assert!(
                    known.contains(contributor),
                    "'{}' lists unknown contributor '{}'",
                    area,
                    contributor
                );
            }
        }
    }

    #[test]
    fn test_severity_order_has_no_duplicates() {
        let mut seen = HashSet::new();
        for label in EVENT_SEVERITY_ORDER {
            assert!(seen.insert(*label), "duplicate label '{}' in severity order", label);
        }
    }

    #[test]
    fn test_every_label_a_member_area_can_produce_is_ranked() {
        let config = default_config().expect("registry config is valid");
        for region in &config.regions {
            let order = config.severity_order(&region.district).unwrap();
            for area in &region.members {
                for window in retained_windows(config.is_short_lag(area)) {
                    for label in rule_for(*window).possible_labels() {
                        if label.is_no_event() {
                            continue;
                        }
                        assert!(
                            order.contains(&label),
                            "area '{}' can produce '{}' which is not ranked",
                            area,
                            label
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_config_marks_blantyre_wards_short_lag() {
        let config = default_config().unwrap();
        assert!(config.is_short_lag("MW31546"));
        assert!(config.is_short_lag("MW10407"));
        assert!(!config.is_short_lag("MW10106"));
        assert_eq!(config.upstream_of("MW31532").unwrap(), ["MW31532".to_string()]);
    }

    #[test]
    fn test_region_descriptions_reach_the_config_summary() {
        let config = default_config().unwrap();
        let summaries = config.region_summaries();
        assert_eq!(summaries.len(), REGION_REGISTRY.len());
        for (region, line) in REGION_REGISTRY.iter().zip(&summaries) {
            let carried = config.regions.iter().find(|r| r.name == region.name).unwrap();
            assert_eq!(carried.description, region.description);
            assert!(
                line.starts_with(region.name) && line.ends_with(region.description),
                "summary for {} should name the region and end with its description: {}",
                region.name,
                line
            );
        }
    }

    #[test]
    fn test_find_region_and_region_for_area() {
        let karonga = find_region("karonga").expect("karonga should be registered");
        assert_eq!(karonga.district, "Karonga");
        assert_eq!(region_for_area("MW10402").map(|r| r.name), Some("rumphi"));
        assert!(region_for_area("MW10505").is_none(), "Mzimba TAs are contributors only");
        assert!(find_region("lilongwe").is_none());
    }
}
