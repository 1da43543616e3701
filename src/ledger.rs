/// Historic ledger of confirmed flood events.
///
/// The only state that survives between runs. Each entry is keyed by the run
/// time (minute precision) and records, for every region confirmed flooding
/// at lead time 0 in that run, the scenario of each affected area.
///
/// On disk the ledger is a JSON object keyed `"%d-%m-%Y_%H_%M"`:
///
/// ```json
/// { "14-01-2024_06_00": { "karonga": { "MW10106": "30mm_12hr" } } }
/// ```
///
/// Stores never delete old entries; readers ignore anything outside their
/// retention window.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

use crate::model::ScenarioLabel;

pub const LEDGER_KEY_FORMAT: &str = "%d-%m-%Y_%H_%M";

/// Region → (area → scenario) for one run.
pub type LedgerEntry = BTreeMap<String, BTreeMap<String, ScenarioLabel>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to access ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger is corrupt: {0}")]
    Corrupt(String),
    #[error("DATABASE_URL must be set for the postgres ledger")]
    MissingDatabaseUrl,
    #[error("ledger database error: {0}")]
    Database(#[from] postgres::Error),
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Truncates a run time to the precision of ledger keys.
pub fn ledger_key_time(run_time: DateTime<Utc>) -> DateTime<Utc> {
    run_time
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(run_time)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricLedger {
    entries: BTreeMap<DateTime<Utc>, LedgerEntry>,
}

impl HistoricLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a run. A second insert for the same minute merges regions.
    pub fn insert(&mut self, run_time: DateTime<Utc>, entry: LedgerEntry) {
        self.entries
            .entry(ledger_key_time(run_time))
            .or_default()
            .extend(entry);
    }

    pub fn insert_region(
        &mut self,
        run_time: DateTime<Utc>,
        region: impl Into<String>,
        events: BTreeMap<String, ScenarioLabel>,
    ) {
        self.entries
            .entry(ledger_key_time(run_time))
            .or_default()
            .insert(region.into(), events);
    }

    pub fn entries(&self) -> &BTreeMap<DateTime<Utc>, LedgerEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries strictly newer than `now - retention`, most recent first.
    pub fn recent(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> impl Iterator<Item = (&DateTime<Utc>, &LedgerEntry)> {
        let cutoff = now - retention;
        self.entries.iter().rev().filter(move |(ts, _)| **ts > cutoff)
    }

    /// Most recent in-window events recorded for a region.
    pub fn latest_for_region(
        &self,
        region: &str,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Option<(DateTime<Utc>, &BTreeMap<String, ScenarioLabel>)> {
        self.recent(now, retention)
            .find_map(|(ts, entry)| entry.get(region).map(|events| (*ts, events)))
    }

    pub fn to_json(&self) -> Result<String, LedgerError> {
        let keyed: BTreeMap<String, &LedgerEntry> = self
            .entries
            .iter()
            .map(|(ts, entry)| (ts.format(LEDGER_KEY_FORMAT).to_string(), entry))
            .collect();
        serde_json::to_string_pretty(&keyed)
            .map_err(|e| LedgerError::Corrupt(format!("failed to serialize ledger: {}", e)))
    }

    /// Parses the on-disk form. Null region values are skipped.
    pub fn from_json(text: &str) -> Result<Self, LedgerError> {
        type RawLedger = BTreeMap<String, BTreeMap<String, Option<BTreeMap<String, ScenarioLabel>>>>;

        let raw: RawLedger =
            serde_json::from_str(text).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let mut ledger = HistoricLedger::new();
        for (key, regions) in raw {
            let run_time = NaiveDateTime::parse_from_str(&key, LEDGER_KEY_FORMAT)
                .map_err(|e| LedgerError::Corrupt(format!("bad run key '{}': {}", key, e)))?
                .and_utc();
            let entry: LedgerEntry = regions
                .into_iter()
                .filter_map(|(region, events)| events.map(|e| (region, e)))
                .collect();
            ledger.insert(run_time, entry);
        }
        Ok(ledger)
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Persistence for the ledger. Read once per run, written at most once.
pub trait LedgerStore {
    fn load(&mut self) -> Result<HistoricLedger, LedgerError>;
    fn save(&mut self, ledger: &HistoricLedger) -> Result<(), LedgerError>;
}

/// Keeps the ledger in memory; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    ledger: HistoricLedger,
    saves: usize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: HistoricLedger) -> Self {
        Self { ledger, saves: 0 }
    }

    pub fn ledger(&self) -> &HistoricLedger {
        &self.ledger
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&mut self) -> Result<HistoricLedger, LedgerError> {
        Ok(self.ledger.clone())
    }

    fn save(&mut self, ledger: &HistoricLedger) -> Result<(), LedgerError> {
        self.ledger = ledger.clone();
        self.saves += 1;
        Ok(())
    }
}

/// JSON file store. A missing file is an empty ledger; a file that exists
/// but cannot be parsed, blank included, is an error.
#[derive(Debug, Clone)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
}

impl JsonFileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerStore for JsonFileLedgerStore {
    fn load(&mut self) -> Result<HistoricLedger, LedgerError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Err(LedgerError::Corrupt(format!(
                "ledger file {} is blank",
                self.path.display()
            ))),
            Ok(text) => HistoricLedger::from_json(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HistoricLedger::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Writes to a sibling temp file, then renames over the ledger.
    fn save(&mut self, ledger: &HistoricLedger) -> Result<(), LedgerError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, ledger.to_json()?).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
