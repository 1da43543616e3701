/// Flash-flood early-warning decision core.
///
/// Turns rainfall forcing (satellite archive plus forecast models, with
/// optional field gauges) into per-region trigger decisions, keeps confirmed
/// flooding sticky across runs through the historic ledger, and plans the
/// uploads for the alert portal.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod db;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod registry;
