use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::command::{HistoryFilter, TransactionKind};

/// Immutable log entry for one completed money movement.
///
/// `from` is only set for transfers. Deposits and withdrawals name the
/// account in `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub from: Option<String>,
    pub to: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn deposit(to: &str, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: TransactionKind::Deposit,
            from: None,
            to: to.to_string(),
            amount,
            timestamp,
        }
    }

    pub fn withdraw(account: &str, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: TransactionKind::Withdraw,
            from: None,
            to: account.to_string(),
            amount,
            timestamp,
        }
    }

    pub fn transfer(from: &str, to: &str, amount: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: TransactionKind::Transfer,
            from: Some(from.to_string()),
            to: to.to_string(),
            amount,
            timestamp,
        }
    }

    pub fn involves(&self, username: &str, filter: HistoryFilter) -> bool {
        filter.matches(username, self.kind, self.from.as_deref(), &self.to)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn serializes_flat() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let record = TransactionRecord::transfer("alice", "bob", Decimal::new(2550, 2), at);

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&record).unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            out,
            "type,from,to,amount,timestamp\ntransfer,alice,bob,25.50,2024-03-01T08:30:00Z\n"
        );

        let deposit = TransactionRecord::deposit("alice", Decimal::new(1, 0), at);
        assert!(deposit.involves("alice", HistoryFilter::All));
        assert!(!deposit.involves("bob", HistoryFilter::All));
        assert!(record.involves("bob", HistoryFilter::Only(TransactionKind::Transfer)));
    }
}
