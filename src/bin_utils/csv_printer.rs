use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{command::TransactionKind, record::TransactionRecord};

#[derive(Debug, Serialize)]
pub struct AccountBalance {
    pub username: String,
    pub balance: Decimal,
}

/// One history entry as returned to the account that asked for it, tagged
/// with the input line of the request.
#[derive(Debug, Serialize)]
pub struct StatementLine {
    pub line: u64,
    pub account: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub from: Option<String>,
    pub to: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl StatementLine {
    pub fn new(line: u64, account: &str, record: TransactionRecord) -> Self {
        Self {
            line,
            account: account.to_string(),
            kind: record.kind,
            from: record.from,
            to: record.to,
            amount: record.amount,
            timestamp: record.timestamp,
        }
    }
}

/// Writes `rows` as CSV with a header taken from the row type.
pub fn print_rows<W, T>(output: &mut W, rows: impl IntoIterator<Item = T>) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        writer.serialize(row).context("Failed to write to CSV")?;
    }
    writer.flush().context("Failed to flush CSV writer")
}
