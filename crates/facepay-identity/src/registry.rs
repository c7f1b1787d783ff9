//! Local record of who is enrolled, one entry per account address.
//!
//! The registry is what the terminal shows; the oracle is what matching uses.
//! The two converge through [`crate::IdentityDirectory::reconcile`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use facepay::{AccountAddress, DisplayName, IdentityRecord, TemplateRef};
use std::sync::Mutex;

use crate::error::IdentityError;

/// Storage backend for enrollment records. Implementations must be thread-safe.
pub trait EnrollmentRegistry: Send + Sync {
    fn is_enrolled(&self, address: &AccountAddress) -> bool;

    fn get(&self, address: &AccountAddress) -> Option<IdentityRecord>;

    /// Insert or replace the record for `record.account_address`.
    fn record(&self, record: &IdentityRecord) -> Result<(), IdentityError>;

    /// Remove the record. Returns `true` if one existed.
    fn revoke(&self, address: &AccountAddress) -> Result<bool, IdentityError>;

    /// All records, ordered by address.
    fn list(&self) -> Vec<IdentityRecord>;
}

/// In-memory registry backed by DashMap. Lost on restart.
pub struct InMemoryEnrollmentRegistry {
    records: DashMap<AccountAddress, IdentityRecord>,
}

impl InMemoryEnrollmentRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryEnrollmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EnrollmentRegistry for InMemoryEnrollmentRegistry {
    fn is_enrolled(&self, address: &AccountAddress) -> bool {
        self.records.contains_key(address)
    }

    fn get(&self, address: &AccountAddress) -> Option<IdentityRecord> {
        self.records.get(address).map(|r| r.value().clone())
    }

    fn record(&self, record: &IdentityRecord) -> Result<(), IdentityError> {
        self.records
            .insert(record.account_address.clone(), record.clone());
        Ok(())
    }

    fn revoke(&self, address: &AccountAddress) -> Result<bool, IdentityError> {
        Ok(self.records.remove(address).is_some())
    }

    fn list(&self) -> Vec<IdentityRecord> {
        let mut all: Vec<IdentityRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.account_address.cmp(&b.account_address));
        all
    }
}

/// Persistent registry backed by SQLite.
pub struct SqliteEnrollmentRegistry {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteEnrollmentRegistry {
    /// Open (or create) the registry database. On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, IdentityError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS enrollments (
                account_address TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                template_ref TEXT NOT NULL,
                enrolled_at TEXT NOT NULL
            );
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
                    "failed to set enrollment database file permissions to 0600"
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
                tracing::error!("enrollment registry mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn record_from_row(
    address: String,
    name: String,
    template_ref: String,
    enrolled_at: String,
) -> Result<IdentityRecord, IdentityError> {
    Ok(IdentityRecord {
        account_address: AccountAddress::new(address)?,
        display_name: DisplayName::new(name)?,
        template_ref: TemplateRef::new(template_ref),
        enrolled_at: DateTime::parse_from_rfc3339(&enrolled_at)
            .map_err(|e| IdentityError::Registry(format!("bad enrolled_at: {e}")))?
            .with_timezone(&Utc),
    })
}

const SELECT_COLUMNS: &str =
    "SELECT account_address, display_name, template_ref, enrolled_at FROM enrollments";

impl EnrollmentRegistry for SqliteEnrollmentRegistry {
    fn is_enrolled(&self, address: &AccountAddress) -> bool {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM enrollments WHERE account_address = ?1",
            [address.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "enrollment lookup failed");
            false
        })
    }

    fn get(&self, address: &AccountAddress) -> Option<IdentityRecord> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE account_address = ?1"),
                [address.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .ok()?;
        match record_from_row(row.0, row.1, row.2, row.3) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(address = %address, error = %e, "unreadable enrollment row");
                None
            }
        }
    }

    fn record(&self, record: &IdentityRecord) -> Result<(), IdentityError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO enrollments (account_address, display_name, template_ref, enrolled_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_address) DO UPDATE SET
                display_name = excluded.display_name,
                template_ref = excluded.template_ref,
                enrolled_at = excluded.enrolled_at",
            rusqlite::params![
                record.account_address.as_str(),
                record.display_name.as_str(),
                record.template_ref.as_str(),
                record.enrolled_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn revoke(&self, address: &AccountAddress) -> Result<bool, IdentityError> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM enrollments WHERE account_address = ?1",
            [address.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn list(&self) -> Vec<IdentityRecord> {
        let conn = self.lock();
        let mut stmt = match conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY account_address")) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to query enrollments");
                return Vec::new();
            }
        };
        let rows = match stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        }) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to read enrollments");
                return Vec::new();
            }
        };

        rows.filter_map(|row| {
            let parsed = row
                .map_err(IdentityError::from)
                .and_then(|(a, n, t, e)| record_from_row(a, n, t, e));
            match parsed {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::error!(error = %e, "skipping unreadable enrollment row");
                    None
                }
            }
        })
        .collect()
    }
}
