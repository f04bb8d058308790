use rust_decimal::{Decimal, prelude::Zero};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceEventKind {
    Credited,
    Debited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceEvent {
    amount: Decimal,
    kind: BalanceEventKind,
}

impl BalanceEvent {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn kind(&self) -> BalanceEventKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient funds: balance {balance} cannot cover {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("Balance overflow: {balance} cannot take {requested} more")]
    BalanceOverflow { balance: Decimal, requested: Decimal },
}

/// Balance of a single account.
///
/// Changes go through `handle_*`, which decides whether a movement is
/// allowed and returns the event describing it, and `apply`, which mutates
/// state from the event without any further checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    amount: Decimal,
}

impl Balance {
    pub fn new(amount: Decimal) -> Self {
        Self { amount }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn apply(&mut self, event: &BalanceEvent) {
        match event.kind {
            BalanceEventKind::Credited => {
                self.amount += event.amount;
            }
            BalanceEventKind::Debited => {
                self.amount -= event.amount;
            }
        }
    }

    pub fn handle_credit(&self, amount: Decimal) -> Result<BalanceEvent, AccountError> {
        if self.amount.checked_add(amount).is_none() {
            return Err(AccountError::BalanceOverflow {
                balance: self.amount,
                requested: amount,
            });
        }
        Ok(BalanceEvent {
            amount,
            kind: BalanceEventKind::Credited,
        })
    }

    pub fn handle_debit(&self, amount: Decimal) -> Result<BalanceEvent, AccountError> {
        // an empty account is rejected before the arithmetic check
        if self.amount <= Decimal::zero() || self.amount - amount < Decimal::zero() {
            return Err(AccountError::InsufficientFunds {
                balance: self.amount,
                requested: amount,
            });
        }
        Ok(BalanceEvent {
            amount,
            kind: BalanceEventKind::Debited,
        })
    }
}
