//! Durable record of transfer invocations.
//!
//! Every attempt that reaches `Processing` is claimed here *before* the
//! sponsored transfer is called, and its outcome is written back afterwards.
//! A claim that cannot be written blocks the transfer. Entries whose outcome
//! is still pending or unknown are what an operator reconciles after a crash
//! or an ambiguous sponsor response.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::amount::{Amount, Currency};
use crate::error::{ErrorKind, FacepayError};
use crate::identity::AccountAddress;
use crate::payment::{AttemptId, TransferOrder};

/// What is known about a claimed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Claimed, no answer recorded yet.
    Pending,
    #[serde(rename_all = "camelCase")]
    Settled { settlement_ref: String },
    #[serde(rename_all = "camelCase")]
    Failed { error_kind: ErrorKind },
    /// The sponsor may or may not have moved funds.
    Unknown,
}

impl AttemptOutcome {
    /// Pending and unknown outcomes need an operator before the payer is retried.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Pending | Self::Unknown)
    }
}

/// One claimed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub attempt_id: AttemptId,
    pub payer: AccountAddress,
    pub payee: AccountAddress,
    pub amount: Amount,
    pub currency: Currency,
    pub outcome: AttemptOutcome,
    pub claimed_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn claim(order: &TransferOrder) -> Self {
        Self {
            attempt_id: order.attempt_id,
            payer: order.payer.clone(),
            payee: order.payee.clone(),
            amount: order.amount,
            currency: order.currency,
            outcome: AttemptOutcome::Pending,
            claimed_at: Utc::now(),
        }
    }
}

/// Storage backend for transfer claims. Implementations must be thread-safe.
pub trait AttemptLedger: Send + Sync {
    /// Atomically record the claim if the attempt id is new.
    /// Returns `false` if it was already claimed or could not be written.
    fn try_claim(&self, entry: &LedgerEntry) -> bool;

    fn is_claimed(&self, attempt_id: &AttemptId) -> bool;

    fn record_outcome(
        &self,
        attempt_id: &AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), FacepayError>;

    fn outcome(&self, attempt_id: &AttemptId) -> Option<AttemptOutcome>;

    /// Entries whose outcome is pending or unknown, oldest first.
    fn unresolved(&self) -> Vec<LedgerEntry>;
}

/// In-memory ledger backed by DashMap. Lost on restart.
pub struct InMemoryAttemptLedger {
    entries: DashMap<AttemptId, LedgerEntry>,
}

impl InMemoryAttemptLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for InMemoryAttemptLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptLedger for InMemoryAttemptLedger {
    fn try_claim(&self, entry: &LedgerEntry) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(entry.attempt_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(entry.clone());
                true
            }
        }
    }

    fn is_claimed(&self, attempt_id: &AttemptId) -> bool {
        self.entries.contains_key(attempt_id)
    }

    fn record_outcome(
        &self,
        attempt_id: &AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), FacepayError> {
        match self.entries.get_mut(attempt_id) {
            Some(mut entry) => {
                entry.outcome = outcome;
                Ok(())
            }
            None => Err(FacepayError::Ledger(format!(
                "attempt {attempt_id} was never claimed"
            ))),
        }
    }

    fn outcome(&self, attempt_id: &AttemptId) -> Option<AttemptOutcome> {
        self.entries.get(attempt_id).map(|e| e.outcome.clone())
    }

    fn unresolved(&self) -> Vec<LedgerEntry> {
        let mut open: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.outcome.is_unresolved())
            .map(|e| e.value().clone())
            .collect();
        open.sort_by_key(|e| e.claimed_at);
        open
    }
}

/// Persistent ledger backed by SQLite. Survives restarts.
pub struct SqliteAttemptLedger {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteAttemptLedger {
    /// Open (or create) the ledger database. On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transfer_attempts (
                attempt_id TEXT PRIMARY KEY,
                payer TEXT NOT NULL,
                payee TEXT NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                outcome TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_claimed_at ON transfer_attempts(claimed_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set ledger database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("attempt ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

type EntryRow = (String, String, String, String, String, String, String);

fn entry_from_row(row: EntryRow) -> Result<LedgerEntry, FacepayError> {
    let (attempt_id, payer, payee, amount, currency, outcome, claimed_at) = row;
    Ok(LedgerEntry {
        attempt_id: AttemptId::parse(&attempt_id)
            .ok_or_else(|| FacepayError::Ledger(format!("bad attempt id {attempt_id}")))?,
        payer: AccountAddress::new(payer)?,
        payee: AccountAddress::new(payee)?,
        amount: Amount::parse(&amount)?,
        currency: currency.parse()?,
        outcome: serde_json::from_str(&outcome)?,
        claimed_at: DateTime::parse_from_rfc3339(&claimed_at)
            .map_err(|e| FacepayError::Ledger(e.to_string()))?
            .with_timezone(&Utc),
    })
}

impl AttemptLedger for SqliteAttemptLedger {
    fn try_claim(&self, entry: &LedgerEntry) -> bool {
        // Fail-secure: any write error means "not claimed", so no transfer runs.
        let outcome = match serde_json::to_string(&entry.outcome) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode ledger outcome");
                return false;
            }
        };
        let conn = self.lock();
        match conn.execute(
            "INSERT INTO transfer_attempts
                (attempt_id, payer, payee, amount, currency, outcome, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.attempt_id.to_string(),
                entry.payer.as_str(),
                entry.payee.as_str(),
                entry.amount.to_string(),
                entry.currency.to_string(),
                outcome,
                entry.claimed_at.to_rfc3339(),
            ],
        ) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(attempt_id = %entry.attempt_id, error = %e, "transfer claim rejected");
                false
            }
        }
    }

    fn is_claimed(&self, attempt_id: &AttemptId) -> bool {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transfer_attempts WHERE attempt_id = ?1",
                [attempt_id.to_string()],
                |row| row.get(0),
            )
            .unwrap_or(1); // Fail-secure: treat unreadable as claimed
        count > 0
    }

    fn record_outcome(
        &self,
        attempt_id: &AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), FacepayError> {
        let encoded = serde_json::to_string(&outcome)?;
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE transfer_attempts SET outcome = ?1 WHERE attempt_id = ?2",
            rusqlite::params![encoded, attempt_id.to_string()],
        )?;
        if updated == 0 {
            return Err(FacepayError::Ledger(format!(
                "attempt {attempt_id} was never claimed"
            )));
        }
        Ok(())
    }

    fn outcome(&self, attempt_id: &AttemptId) -> Option<AttemptOutcome> {
        let conn = self.lock();
        let raw: String = conn
            .query_row(
                "SELECT outcome FROM transfer_attempts WHERE attempt_id = ?1",
                [attempt_id.to_string()],
                |row| row.get(0),
            )
            .ok()?;
        match serde_json::from_str(&raw) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(attempt_id = %attempt_id, error = %e, "unreadable ledger outcome");
                Some(AttemptOutcome::Unknown)
            }
        }
    }

    fn unresolved(&self) -> Vec<LedgerEntry> {
        let conn = self.lock();
        let mut stmt = match conn.prepare(
            "SELECT attempt_id, payer, payee, amount, currency, outcome, claimed_at
             FROM transfer_attempts ORDER BY claimed_at ASC",
        ) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to query attempt ledger");
                return Vec::new();
            }
        };
        let rows = match stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        }) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to read attempt ledger");
                return Vec::new();
            }
        };

        let mut open = Vec::new();
        for row in rows {
            let parsed = row
                .map_err(FacepayError::from)
                .and_then(entry_from_row);
            match parsed {
                Ok(entry) if entry.outcome.is_unresolved() => open.push(entry),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "skipping unreadable ledger row"),
            }
        }
        open
    }
}
