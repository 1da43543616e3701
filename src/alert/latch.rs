/// Sticky "flooding now" state across runs.
///
/// Once a region is confirmed flooding (triggered at lead time 0) it stays
/// triggered for the retention window even if later forecasts calm down, so
/// responders are not told to stand down while water is still on the ground.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ledger::{ledger_key_time, LedgerEntry, LedgerError, LedgerStore};
use crate::logging::{self, Stage};
use crate::model::RegionDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchState {
    /// No confirmation in the window; the fresh decision stands as computed.
    Untriggered,
    /// Confirmed at lead time 0 by this run.
    FreshlyTriggered,
    /// Held triggered by an earlier run's confirmation.
    LatchedHistoric,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatchedDecision {
    pub decision: RegionDecision,
    pub state: LatchState,
    /// Run time of the ledger entry the decision comes from.
    pub confirmed_at: Option<DateTime<Utc>>,
}

pub struct HistoricStickyStateManager<S: LedgerStore> {
    store: S,
    retention: Duration,
}

impl<S: LedgerStore> HistoricStickyStateManager<S> {
    pub fn new(store: S, retention_days: i64) -> Self {
        Self {
            store,
            retention: Duration::days(retention_days),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Records this run's confirmations and replays the ledger over `decisions`.
    ///
    /// The ledger is loaded once and saved only when this run confirmed at
    /// least one region.
    pub fn apply(
        &mut self,
        decisions: Vec<RegionDecision>,
        run_time: DateTime<Utc>,
    ) -> Result<Vec<LatchedDecision>, LedgerError> {
        let mut ledger = self.store.load()?;

        let confirmed: LedgerEntry = decisions
            .iter()
            .filter(|d| d.is_confirmed_now())
            .map(|d| (d.region.clone(), d.events.clone()))
            .collect();
        if !confirmed.is_empty() {
            let count = confirmed.len();
            ledger.insert(run_time, confirmed);
            self.store.save(&ledger)?;
            logging::info(
                Stage::Ledger,
                None,
                &format!("recorded {} confirmed region(s) for this run", count),
            );
        }

        let run_key = ledger_key_time(run_time);
        let latched = decisions
            .into_iter()
            .map(|decision| match ledger.latest_for_region(&decision.region, run_time, self.retention) {
                Some((confirmed_at, events)) => {
                    let state = if confirmed_at == run_key {
                        LatchState::FreshlyTriggered
                    } else {
                        LatchState::LatchedHistoric
                    };
                    if state == LatchState::LatchedHistoric {
                        logging::info(
                            Stage::Ledger,
                            None,
                            &format!("region {} held triggered since {}", decision.region, confirmed_at),
                        );
                    }
                    LatchedDecision {
                        decision: RegionDecision {
                            region: decision.region,
                            triggered: true,
                            lead_time_hours: Some(0),
                            events: events.clone(),
                        },
                        state,
                        confirmed_at: Some(confirmed_at),
                    }
                }
                None => LatchedDecision {
                    decision,
                    state: LatchState::Untriggered,
                    confirmed_at: None,
                },
            })
            .collect();
        Ok(latched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HistoricLedger, MemoryLedgerStore};
    use crate::model::ScenarioLabel;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 6, 0, 0).unwrap()
    }

    fn label(s: &str) -> ScenarioLabel {
        s.parse().unwrap()
    }

    fn confirmed(region: &str, area: &str, scenario: &str) -> RegionDecision {
        let mut events = BTreeMap::new();
        events.insert(area.to_string(), label(scenario));
        RegionDecision {
            region: region.to_string(),
            triggered: true,
            lead_time_hours: Some(0),
            events,
        }
    }

    #[test]
    fn test_confirmation_latches_for_four_days_and_expires_by_six() {
        let mut manager = HistoricStickyStateManager::new(MemoryLedgerStore::new(), 5);

        let first = manager.apply(vec![confirmed("karonga", "MW10106", "30mm_12hr")], day(10)).unwrap();
        assert_eq!(first[0].state, LatchState::FreshlyTriggered);

        let later = manager.apply(vec![RegionDecision::untriggered("karonga")], day(14)).unwrap();
        assert_eq!(later[0].state, LatchState::LatchedHistoric);
        assert!(later[0].decision.triggered);
        assert_eq!(later[0].decision.lead_time_hours, Some(0));
        assert_eq!(later[0].decision.events["MW10106"], label("30mm_12hr"));
        assert_eq!(later[0].confirmed_at, Some(day(10)));

        let expired = manager.apply(vec![RegionDecision::untriggered("karonga")], day(16)).unwrap();
        assert_eq!(expired[0].state, LatchState::Untriggered);
        assert!(!expired[0].decision.triggered);
    }

    #[test]
    fn test_only_lead_zero_triggers_are_recorded() {
        let mut manager = HistoricStickyStateManager::new(MemoryLedgerStore::new(), 5);
        let mut future = confirmed("rumphi", "MW10407", "40mm_1hr");
        future.lead_time_hours = Some(6);

        let result = manager.apply(vec![future.clone()], day(10)).unwrap();
        assert_eq!(result[0].state, LatchState::Untriggered);
        assert_eq!(result[0].decision, future, "fresh decision passes through unchanged");
        assert_eq!(manager.store().save_count(), 0, "nothing confirmed, nothing written");
    }

    #[test]
    fn test_most_recent_confirmation_supplies_the_events() {
        let mut ledger = HistoricLedger::new();
        let mut older = BTreeMap::new();
        older.insert("karonga".to_string(), confirmed("karonga", "MW10106", "30mm_12hr").events);
        ledger.insert(day(9), older);
        let mut newer = BTreeMap::new();
        newer.insert("karonga".to_string(), confirmed("karonga", "MW10104", "50mm_24hr").events);
        ledger.insert(day(11), newer);

        let mut manager = HistoricStickyStateManager::new(MemoryLedgerStore::with_ledger(ledger), 5);
        let result = manager.apply(vec![RegionDecision::untriggered("karonga")], day(12)).unwrap();
        assert_eq!(result[0].decision.events.keys().collect::<Vec<_>>(), vec!["MW10104"]);
        assert_eq!(result[0].confirmed_at, Some(day(11)));
    }

    #[test]
    fn test_latch_overrides_a_fresh_future_trigger() {
        let mut manager = HistoricStickyStateManager::new(MemoryLedgerStore::new(), 5);
        manager.apply(vec![confirmed("karonga", "MW10106", "30mm_12hr")], day(10)).unwrap();

        let mut fresh = confirmed("karonga", "MW10220", "60mm_12hr");
        fresh.lead_time_hours = Some(9);
        let result = manager.apply(vec![fresh], day(11)).unwrap();
        assert_eq!(result[0].decision.lead_time_hours, Some(0));
        assert!(result[0].decision.events.contains_key("MW10106"));
    }
}
