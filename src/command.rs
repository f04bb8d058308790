use std::{fmt, str::FromStr};

use rust_decimal::{Decimal, prelude::Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
            TransactionKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdraw" => Ok(Self::Withdraw),
            "transfer" => Ok(Self::Transfer),
            other => Err(CommandError::UnknownKind(other.to_string())),
        }
    }
}

/// Selects which records `history` returns for an account.
///
/// Deposits and withdrawals only ever name the account on the `to` side, so
/// those filters look at `to` alone. `All` and `Transfer` match either side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryFilter {
    #[default]
    All,
    Only(TransactionKind),
}

impl HistoryFilter {
    pub fn kind(&self) -> Option<TransactionKind> {
        match self {
            HistoryFilter::All => None,
            HistoryFilter::Only(kind) => Some(*kind),
        }
    }

    pub fn matches(
        &self,
        username: &str,
        kind: TransactionKind,
        from: Option<&str>,
        to: &str,
    ) -> bool {
        let as_source = from == Some(username);
        let as_target = to == username;
        match self {
            HistoryFilter::All => as_source || as_target,
            HistoryFilter::Only(TransactionKind::Transfer) => {
                kind == TransactionKind::Transfer && (as_source || as_target)
            }
            HistoryFilter::Only(wanted) => kind == *wanted && as_target,
        }
    }
}

impl FromStr for HistoryFilter {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "*" => Ok(Self::All),
            other => other
                .parse()
                .map(Self::Only)
                .map_err(|_| CommandError::UnknownFilter(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Amount is required for {kind}")]
    AmountRequired { kind: TransactionKind },
    #[error("Amount must be greater than zero, got {amount}")]
    InvalidAmount { amount: Decimal },
    #[error("Account name must not be empty")]
    EmptyAccount,
    #[error("Counterparty is required for transfer")]
    CounterpartyRequired,
    #[error("Unknown transaction type `{0}`")]
    UnknownKind(String),
    #[error("Unknown transaction filter `{0}`")]
    UnknownFilter(String),
}

/// Money movement requested by an already authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    Deposit { amount: Decimal },
    Withdraw { amount: Decimal },
    Transfer { to: String, amount: Decimal },
}

impl LedgerCommand {
    pub fn parse_command(
        kind: TransactionKind,
        amount: Option<Decimal>,
        counterparty: Option<String>,
    ) -> Result<Self, CommandError> {
        let amount = amount.ok_or(CommandError::AmountRequired { kind })?;
        let amount = validate_amount(amount)?;
        match kind {
            TransactionKind::Deposit => Ok(Self::Deposit { amount }),
            TransactionKind::Withdraw => Ok(Self::Withdraw { amount }),
            TransactionKind::Transfer => {
                let to = counterparty
                    .filter(|to| !to.is_empty())
                    .ok_or(CommandError::CounterpartyRequired)?;
                Ok(Self::Transfer { to, amount })
            }
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            LedgerCommand::Deposit { .. } => TransactionKind::Deposit,
            LedgerCommand::Withdraw { .. } => TransactionKind::Withdraw,
            LedgerCommand::Transfer { .. } => TransactionKind::Transfer,
        }
    }
}

pub fn validate_amount(amount: Decimal) -> Result<Decimal, CommandError> {
    if amount > Decimal::zero() {
        Ok(amount)
    } else {
        Err(CommandError::InvalidAmount { amount })
    }
}

pub fn validate_account(username: &str) -> Result<&str, CommandError> {
    if username.is_empty() {
        Err(CommandError::EmptyAccount)
    } else {
        Ok(username)
    }
}
