use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};
use rust_decimal::Decimal;

use crate::{
    command::{HistoryFilter, TransactionKind},
    credential::{Account, PasswordDigest},
    record::TransactionRecord,
    session::Session,
};

use super::{LedgerStore, LedgerUnit, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite backed store.
///
/// Atomic units are `BEGIN IMMEDIATE` transactions: the database write lock
/// is taken before the first balance read, so two units touching the same
/// account can never both act on a stale balance.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "database opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Closes the underlying connection, reporting any error SQLite raises
    /// while flushing.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, err)| StoreError::Database(err))
    }
}

fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            username TEXT PRIMARY KEY NOT NULL,
            digest TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS balances (
            username TEXT PRIMARY KEY NOT NULL REFERENCES accounts(username),
            balance TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY NOT NULL,
            username TEXT NOT NULL REFERENCES accounts(username),
            expires_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            source TEXT,
            target TEXT NOT NULL,
            amount TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions(source);
        CREATE INDEX IF NOT EXISTS idx_transactions_target ON transactions(target);",
    )?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn parse_decimal(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|err| StoreError::Corrupt(format!("amount `{raw}`: {err}")))
}

/// Fixed-width UTC form, so text order in SQL is time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp `{raw}`: {err}")))
}

struct RawRecord {
    kind: String,
    source: Option<String>,
    target: String,
    amount: String,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get(0)?,
            source: row.get(1)?,
            target: row.get(2)?,
            amount: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<TransactionRecord, StoreError> {
        Ok(TransactionRecord {
            kind: self
                .kind
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("transaction kind `{}`", self.kind)))?,
            from: self.source,
            to: self.target,
            amount: parse_decimal(&self.amount)?,
            timestamp: parse_timestamp(&self.created_at)?,
        })
    }
}

struct SqliteUnit<'a> {
    tx: &'a Transaction<'a>,
}

impl LedgerUnit for SqliteUnit<'_> {
    fn lock_balance(&mut self, username: &str) -> Result<Option<Decimal>, StoreError> {
        // the IMMEDIATE transaction already holds the write lock
        let raw: Option<String> = self
            .tx
            .query_row(
                "SELECT balance FROM balances WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_decimal).transpose()
    }

    fn write_balance(&mut self, username: &str, balance: Decimal) -> Result<(), StoreError> {
        let updated = self.tx.execute(
            "UPDATE balances SET balance = ?1 WHERE username = ?2",
            params![balance.to_string(), username],
        )?;
        if updated != 1 {
            return Err(StoreError::Corrupt(format!(
                "no balance row for `{username}`"
            )));
        }
        Ok(())
    }

    fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO transactions (kind, source, target, amount, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.kind.as_str(),
                record.from,
                record.to,
                record.amount.to_string(),
                format_timestamp(record.timestamp),
            ],
        )?;
        Ok(())
    }
}

impl LedgerStore for SqliteStore {
    fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO accounts (username, digest) VALUES (?1, ?2)",
            params![account.username(), account.digest().as_str()],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(StoreError::Duplicate(account.username().to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        tx.execute(
            "INSERT INTO balances (username, balance) VALUES (?1, ?2)",
            params![account.username(), Decimal::ZERO.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn.lock();
        let digest: Option<String> = conn
            .query_row(
                "SELECT digest FROM accounts WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(digest.map(|digest| Account::new(username, PasswordDigest::from_hex(&digest))))
    }

    fn insert_session(&self, session: &Session, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let pruned = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![format_timestamp(now)],
        )?;
        if pruned > 0 {
            tracing::debug!(pruned, "expired sessions removed");
        }
        let inserted = conn.execute(
            "INSERT INTO sessions (token, username, expires_at) VALUES (?1, ?2, ?3)",
            params![
                session.token(),
                session.username(),
                format_timestamp(session.expires_at())
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => {
                Err(StoreError::Duplicate("session token".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT username, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(username, expires_at)| -> Result<Session, StoreError> {
            Ok(Session::new(token, &username, parse_timestamp(&expires_at)?))
        })
        .transpose()
    }

    fn balance(&self, username: &str) -> Result<Option<Decimal>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT balance FROM balances WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        raw.as_deref().map(parse_decimal).transpose()
    }

    fn history(
        &self,
        username: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let conn = self.conn.lock();
        let columns = "SELECT kind, source, target, amount, created_at FROM transactions";
        let raw = match filter.kind() {
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{columns} WHERE source = ?1 OR target = ?1 ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(params![username], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Some(TransactionKind::Transfer) => {
                let mut stmt = conn.prepare(&format!(
                    "{columns} WHERE kind = ?2 AND (source = ?1 OR target = ?1) ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(
                        params![username, TransactionKind::Transfer.as_str()],
                        RawRecord::from_row,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            Some(kind) => {
                let mut stmt = conn.prepare(&format!(
                    "{columns} WHERE kind = ?2 AND target = ?1 ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(params![username, kind.as_str()], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        raw.into_iter().map(RawRecord::into_record).collect()
    }

    fn atomically<T, E>(
        &self,
        unit: impl FnOnce(&mut dyn LedgerUnit) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let outcome = unit(&mut SqliteUnit { tx: &tx });
        match outcome {
            Ok(out) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(out)
            }
            Err(err) => {
                tracing::debug!("atomic unit failed, rolling back");
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!(%rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    fn account(name: &str) -> Account {
        Account::new(name, PasswordDigest::from_hex("abcd"))
    }

    #[test]
    fn create_and_find_account() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_account(&account("alice")).unwrap();

        let found = store.find_account("alice").unwrap().unwrap();
        assert_eq!(found.username(), "alice");
        assert_eq!(found.digest().as_str(), "abcd");
        assert_eq!(store.balance("alice").unwrap(), Some(Decimal::ZERO));
        assert!(store.find_account("bob").unwrap().is_none());

        let err = store.create_account(&account("alice")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn sessions_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_account(&account("alice")).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let session = Session::new("tok", "alice", now + Duration::minutes(10));
        store.insert_session(&session, now).unwrap();

        assert_eq!(store.find_session("tok").unwrap(), Some(session.clone()));
        assert!(store.find_session("other").unwrap().is_none());
        assert!(matches!(
            store.insert_session(&session, now).unwrap_err(),
            StoreError::Duplicate(_)
        ));
    }

    #[test]
    fn expired_sessions_are_pruned() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_account(&account("alice")).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let old = Session::new("old", "alice", start + Duration::minutes(10));
        store.insert_session(&old, start).unwrap();

        // still live one nanosecond before expiry
        let almost = start + Duration::minutes(10) - Duration::nanoseconds(1);
        let kept = Session::new("kept", "alice", almost + Duration::minutes(10));
        store.insert_session(&kept, almost).unwrap();
        assert!(store.find_session("old").unwrap().is_some());

        let later = start + Duration::minutes(10);
        let new = Session::new("new", "alice", later + Duration::minutes(10));
        store.insert_session(&new, later).unwrap();
        assert!(store.find_session("old").unwrap().is_none());
        assert_eq!(store.find_session("kept").unwrap(), Some(kept));
        assert_eq!(store.find_session("new").unwrap(), Some(new));
    }

    #[test]
    fn rollback_discards_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_account(&account("alice")).unwrap();

        let res: Result<(), StoreError> = store.atomically(|unit| {
            unit.append_record(&TransactionRecord::deposit("alice", Decimal::ONE, Utc::now()))?;
            unit.write_balance("alice", Decimal::ONE)?;
            assert_eq!(unit.lock_balance("alice")?, Some(Decimal::ONE));
            Err(StoreError::Corrupt("boom".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(store.balance("alice").unwrap(), Some(Decimal::ZERO));
        assert!(store.history("alice", HistoryFilter::All).unwrap().is_empty());
    }

    #[test]
    fn history_filters_by_role() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_account(&account("alice")).unwrap();
        store.create_account(&account("bob")).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let ten = Decimal::from_u32(10).unwrap();

        store
            .atomically(|unit| -> Result<(), StoreError> {
                unit.append_record(&TransactionRecord::deposit("alice", ten, at))?;
                unit.append_record(&TransactionRecord::withdraw("alice", ten, at))?;
                unit.append_record(&TransactionRecord::transfer("alice", "bob", ten, at))?;
                unit.append_record(&TransactionRecord::deposit("bob", ten, at))
            })
            .unwrap();

        let all = store.history("alice", HistoryFilter::All).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], TransactionRecord::transfer("alice", "bob", ten, at));

        let deposits = store
            .history("alice", HistoryFilter::Only(TransactionKind::Deposit))
            .unwrap();
        assert_eq!(deposits, vec![TransactionRecord::deposit("alice", ten, at)]);

        let transfers = store
            .history("bob", HistoryFilter::Only(TransactionKind::Transfer))
            .unwrap();
        assert_eq!(transfers.len(), 1);

        let bob_all = store.history("bob", HistoryFilter::All).unwrap();
        assert_eq!(bob_all.len(), 2);
    }

    #[test]
    fn reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let store = SqliteStore::open(&path).unwrap();
        store.create_account(&account("alice")).unwrap();
        store
            .atomically(|unit| unit.write_balance("alice", Decimal::new(1999, 2)))
            .unwrap();
        store.close().unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.balance("alice").unwrap(), Some(Decimal::new(1999, 2)));
        store.close().unwrap();
    }
}
