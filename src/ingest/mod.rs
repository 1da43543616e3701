/// Rainfall input handling.
///
/// Submodules:
/// - `forcing`: archive/forecast selection and stitching into per-area series.
/// - `gauge`:   field rain-gauge counters and their overlay on forcing.
/// - `waterlevel`: river sensor levels reported alongside the decision.
/// - `bundle`:  JSON run bundles served through the source traits.

pub mod bundle;
pub mod forcing;
pub mod gauge;
pub mod waterlevel;
