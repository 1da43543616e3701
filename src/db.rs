/// PostgreSQL backend for the historic ledger.
///
/// One row per (run, region) with the area → scenario map stored as JSON
/// text. The table is created on connect if it does not exist.
///
/// Connection string comes from `DATABASE_URL` (read from `.env` if present).

use std::collections::BTreeMap;
use std::env;

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls};

use crate::ledger::{HistoricLedger, LedgerError, LedgerStore};
use crate::model::ScenarioLabel;

pub struct PostgresLedgerStore {
    client: Client,
    table: String,
}

/// Table names are interpolated into SQL, so only plain identifiers
/// (optionally schema-qualified) are accepted.
fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl PostgresLedgerStore {
    pub fn connect(database_url: &str, table: &str) -> Result<Self, LedgerError> {
        if !is_valid_table_name(table) {
            return Err(LedgerError::Corrupt(format!("invalid ledger table name '{}'", table)));
        }
        let client = Client::connect(database_url, NoTls)?;
        let mut store = Self {
            client,
            table: table.to_string(),
        };
        store.ensure_table()?;
        Ok(store)
    }

    /// Connects using `DATABASE_URL`.
    pub fn from_env(table: &str) -> Result<Self, LedgerError> {
        dotenv::dotenv().ok();
        let url = env::var("DATABASE_URL").map_err(|_| LedgerError::MissingDatabaseUrl)?;
        Self::connect(&url, table)
    }

    fn ensure_table(&mut self) -> Result<(), LedgerError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                run_time TIMESTAMPTZ NOT NULL,
                region   TEXT        NOT NULL,
                events   TEXT        NOT NULL,
                PRIMARY KEY (run_time, region)
            )",
            self.table
        );
        self.client.batch_execute(&ddl)?;
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Removes every row; used to isolate integration tests.
    pub fn clear(&mut self) -> Result<u64, LedgerError> {
        let sql = format!("DELETE FROM {}", self.table);
        Ok(self.client.execute(sql.as_str(), &[])?)
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn load(&mut self) -> Result<HistoricLedger, LedgerError> {
        let sql = format!(
            "SELECT run_time, region, events FROM {} ORDER BY run_time",
            self.table
        );
        let rows = self.client.query(sql.as_str(), &[])?;

        let mut ledger = HistoricLedger::new();
        for row in rows {
            let run_time: DateTime<Utc> = row.get(0);
            let region: String = row.get(1);
            let events_json: String = row.get(2);
            let events: BTreeMap<String, ScenarioLabel> = serde_json::from_str(&events_json)
                .map_err(|e| {
                    LedgerError::Corrupt(format!("events for {} at {}: {}", region, run_time, e))
                })?;
            ledger.insert_region(run_time, region, events);
        }
        Ok(ledger)
    }

    /// Upserts every entry in one transaction.
    fn save(&mut self, ledger: &HistoricLedger) -> Result<(), LedgerError> {
        let sql = format!(
            "INSERT INTO {} (run_time, region, events) VALUES ($1, $2, $3)
             ON CONFLICT (run_time, region) DO UPDATE SET events = EXCLUDED.events",
            self.table
        );
        let mut tx = self.client.transaction()?;
        for (run_time, entry) in ledger.entries() {
            for (region, events) in entry {
                let events_json = serde_json::to_string(events)
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
                tx.execute(sql.as_str(), &[run_time, region, &events_json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
