use std::{fmt, sync::Arc};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    account::{AccountError, Balance},
    clock::Clock,
    command::{CommandError, HistoryFilter, LedgerCommand, validate_account, validate_amount},
    credential::{CredentialError, Credentials},
    record::TransactionRecord,
    store::{LedgerStore, LedgerUnit, StoreError},
};

/// Which side of a movement an account was named on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Source,
    Destination,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Source => f.write_str("source"),
            Party::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    CommandErr(#[from] CommandError),
    #[error("The {side} account `{username}` does not exist")]
    AccountNotFound { username: String, side: Party },
    #[error(transparent)]
    AccountErr(#[from] AccountError),
    #[error(transparent)]
    StoreErr(#[from] StoreError),
}

/// Moves money between accounts.
///
/// Every mutation runs in one atomic unit of the store: the log entry and the
/// balance change(s) become visible together or not at all. Validation that
/// needs no balance (amount, account names, existence) happens before the
/// unit is opened.
pub struct Ledger<S> {
    store: Arc<S>,
    credentials: Credentials<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>, credentials: Credentials<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            credentials,
            clock,
        }
    }

    pub fn execute(&self, account: &str, command: LedgerCommand) -> Result<(), LedgerError> {
        match command {
            LedgerCommand::Deposit { amount } => self.deposit(account, amount),
            LedgerCommand::Withdraw { amount } => self.withdraw(account, amount),
            LedgerCommand::Transfer { to, amount } => self.transfer(account, &to, amount),
        }
    }

    pub fn deposit(&self, account: &str, amount: Decimal) -> Result<(), LedgerError> {
        let amount = validate_amount(amount)?;
        self.require_account(account, Party::Destination)?;

        let record = TransactionRecord::deposit(account, amount, self.clock.now());
        self.store.atomically(|unit| -> Result<(), LedgerError> {
            unit.append_record(&record)?;
            credit(unit, account, amount)
        })?;
        tracing::info!(account, %amount, "deposit");
        Ok(())
    }

    pub fn withdraw(&self, account: &str, amount: Decimal) -> Result<(), LedgerError> {
        let amount = validate_amount(amount)?;
        self.require_account(account, Party::Source)?;

        let record = TransactionRecord::withdraw(account, amount, self.clock.now());
        self.store.atomically(|unit| -> Result<(), LedgerError> {
            debit(unit, account, amount)?;
            unit.append_record(&record)?;
            Ok(())
        })?;
        tracing::info!(account, %amount, "withdraw");
        Ok(())
    }

    pub fn transfer(&self, from: &str, to: &str, amount: Decimal) -> Result<(), LedgerError> {
        let amount = validate_amount(amount)?;
        validate_account(from)?;
        validate_account(to)?;
        self.require_account(from, Party::Source)?;
        self.require_account(to, Party::Destination)?;

        let record = TransactionRecord::transfer(from, to, amount, self.clock.now());
        self.store.atomically(|unit| -> Result<(), LedgerError> {
            debit(unit, from, amount)?;
            unit.append_record(&record)?;
            credit(unit, to, amount)
        })?;
        tracing::info!(from, to, %amount, "transfer");
        Ok(())
    }

    pub fn history(
        &self,
        account: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.require_account(account, Party::Source)?;
        Ok(self.store.history(account, filter)?)
    }

    pub fn balance(&self, account: &str) -> Result<Decimal, LedgerError> {
        self.store
            .balance(account)?
            .ok_or_else(|| LedgerError::AccountNotFound {
                username: account.to_string(),
                side: Party::Source,
            })
    }

    fn require_account(&self, username: &str, side: Party) -> Result<(), LedgerError> {
        match self.credentials.lookup(username) {
            Ok(_) => Ok(()),
            Err(CredentialError::StoreErr(err)) => Err(err.into()),
            Err(_) => Err(LedgerError::AccountNotFound {
                username: username.to_string(),
                side,
            }),
        }
    }
}

fn locked_balance<U: LedgerUnit + ?Sized>(
    unit: &mut U,
    username: &str,
) -> Result<Balance, LedgerError> {
    let balance = unit
        .lock_balance(username)?
        .ok_or_else(|| StoreError::Corrupt(format!("account `{username}` has no balance")))?;
    Ok(Balance::new(balance))
}

fn credit<U: LedgerUnit + ?Sized>(
    unit: &mut U,
    username: &str,
    amount: Decimal,
) -> Result<(), LedgerError> {
    let mut balance = locked_balance(unit, username)?;
    let event = balance.handle_credit(amount)?;
    balance.apply(&event);
    unit.write_balance(username, balance.amount())?;
    Ok(())
}

fn debit<U: LedgerUnit + ?Sized>(
    unit: &mut U,
    username: &str,
    amount: Decimal,
) -> Result<(), LedgerError> {
    let mut balance = locked_balance(unit, username)?;
    let event = balance.handle_debit(amount)?;
    balance.apply(&event);
    unit.write_balance(username, balance.amount())?;
    Ok(())
}
