/// Rainfall analysis for the flash-flood decision core.
///
/// Turns per-area forcing series into one worst-case scenario per area.
///
/// Submodules:
/// - `rolling`:  trailing-window totals and upstream blending.
/// - `classify`: bucket rules mapping totals onto scenario labels.
/// - `severity`: per-district severity orders and worst-scenario ranking.

pub mod classify;
pub mod rolling;
pub mod severity;
