use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    command::HistoryFilter, credential::Account, record::TransactionRecord, session::Session,
};

pub mod in_memory_store;
pub mod sqlite_store;

pub use in_memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Duplicate(String),
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Mutations available inside one atomic unit.
///
/// Reads see the unit's own earlier writes. Nothing written here is visible
/// to other callers until the unit commits.
pub trait LedgerUnit {
    /// Reads an account balance and holds it exclusively until the unit
    /// ends. `None` when the account has no balance row.
    fn lock_balance(&mut self, username: &str) -> Result<Option<Decimal>, StoreError>;

    fn write_balance(&mut self, username: &str, balance: Decimal) -> Result<(), StoreError>;

    fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError>;
}

/// Durable state shared by the credential store, the authenticator and the
/// ledger: accounts, balances, sessions and the transaction log.
pub trait LedgerStore: Send + Sync {
    /// Creates the account together with a zero balance. Fails with
    /// [`StoreError::Duplicate`] if the username is taken, leaving nothing
    /// behind.
    fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// Stores `session` and drops every session that expired at or before
    /// `now`.
    fn insert_session(&self, session: &Session, now: DateTime<Utc>) -> Result<(), StoreError>;

    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    fn balance(&self, username: &str) -> Result<Option<Decimal>, StoreError>;

    /// Records involving `username` that pass `filter`, in storage order.
    fn history(
        &self,
        username: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Runs `unit` as one all-or-nothing change. Its writes are published
    /// only when it returns `Ok`; on `Err` they are rolled back and the error
    /// is returned unchanged.
    fn atomically<T, E>(
        &self,
        unit: impl FnOnce(&mut dyn LedgerUnit) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>;
}
