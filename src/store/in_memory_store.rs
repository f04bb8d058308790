use std::collections::{HashMap, hash_map::Entry};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::{
    command::HistoryFilter, credential::Account, record::TransactionRecord, session::Session,
};

use super::{LedgerStore, LedgerUnit, StoreError};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    balances: HashMap<String, Decimal>,
    sessions: HashMap<String, Session>,
    records: Vec<TransactionRecord>,
}

/// Process-local store. A single lock guards all collections, so an atomic
/// unit runs with every other caller excluded.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Writes staged by an in-flight unit. Dropped on rollback.
struct InMemoryUnit<'a> {
    state: &'a State,
    balances: HashMap<String, Decimal>,
    records: Vec<TransactionRecord>,
}

impl LedgerUnit for InMemoryUnit<'_> {
    fn lock_balance(&mut self, username: &str) -> Result<Option<Decimal>, StoreError> {
        // the store lock is already held for the whole unit
        Ok(self
            .balances
            .get(username)
            .or_else(|| self.state.balances.get(username))
            .copied())
    }

    fn write_balance(&mut self, username: &str, balance: Decimal) -> Result<(), StoreError> {
        if !self.state.balances.contains_key(username) {
            return Err(StoreError::Corrupt(format!(
                "no balance row for `{username}`"
            )));
        }
        self.balances.insert(username.to_string(), balance);
        Ok(())
    }

    fn append_record(&mut self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.records.push(record.clone());
        Ok(())
    }
}

impl LedgerStore for InMemoryStore {
    fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let State {
            accounts, balances, ..
        } = &mut *state;
        match accounts.entry(account.username().to_string()) {
            Entry::Occupied(entry) => Err(StoreError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => {
                balances.insert(entry.key().clone(), Decimal::ZERO);
                entry.insert(account.clone());
                Ok(())
            }
        }
    }

    fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().accounts.get(username).cloned())
    }

    fn insert_session(&self, session: &Session, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.sessions.retain(|_, live| live.is_live_at(now));
        match state.sessions.entry(session.token().to_string()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("session token".to_string())),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
                Ok(())
            }
        }
    }

    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().sessions.get(token).cloned())
    }

    fn balance(&self, username: &str) -> Result<Option<Decimal>, StoreError> {
        Ok(self.state.lock().balances.get(username).copied())
    }

    fn history(
        &self,
        username: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|record| record.involves(username, filter))
            .cloned()
            .collect())
    }

    fn atomically<T, E>(
        &self,
        unit: impl FnOnce(&mut dyn LedgerUnit) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut state = self.state.lock();
        let mut staged = InMemoryUnit {
            state: &state,
            balances: HashMap::new(),
            records: Vec::new(),
        };
        let out = match unit(&mut staged) {
            Ok(out) => out,
            Err(err) => {
                tracing::debug!("atomic unit failed, discarding staged writes");
                return Err(err);
            }
        };
        let InMemoryUnit {
            balances, records, ..
        } = staged;
        state.balances.extend(balances);
        state.records.extend(records);
        Ok(out)
    }
}
