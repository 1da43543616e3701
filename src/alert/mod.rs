/// Alerting: turning per-area scenarios into what gets uploaded.
///
/// Submodules:
/// - `thresholds`:  impact thresholds and per-region trigger decisions.
/// - `latch`:       confirmed-now events held across runs via the ledger.
/// - `dispatch`:    grouping final decisions into upload batches.
/// - `stalenesses`: input age checks.

pub mod dispatch;
pub mod latch;
pub mod stalenesses;
pub mod thresholds;
