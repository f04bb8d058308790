use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Register,
    Login,
    Deposit,
    Withdraw,
    Transfer,
    History,
}

/// One input row. For `history` rows the `counterparty` column carries the
/// filter (`deposit`, `withdraw`, `transfer`, or empty for everything).
#[derive(Debug, Deserialize)]
pub struct Operation {
    pub op: OperationKind,
    pub user: String,
    pub secret: Option<String>,
    pub counterparty: Option<String>,
    pub amount: Option<Decimal>,
}

/// Parses ledger operations in CSV format. Rows that fail to parse are
/// yielded as errors so the caller can report them with their line number.
pub struct CsvOperationParser<R> {
    iter: DeserializeRecordsIntoIter<R, Operation>,
}

impl<R> CsvOperationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvOperationParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Operation, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rows() {
        let input = "op,user,secret,counterparty,amount
register, alice ,pw1,,
transfer,alice,,bob,1.25
deposit,alice,,,oops
history,alice,,withdraw,
";
        let rows: Vec<_> = CsvOperationParser::new(input.as_bytes()).collect();
        assert_eq!(rows.len(), 4);

        let (_, register) = &rows[0];
        let register = register.as_ref().unwrap();
        assert_eq!(register.op, OperationKind::Register);
        assert_eq!(register.user, "alice");
        assert_eq!(register.secret.as_deref(), Some("pw1"));
        assert_eq!(register.amount, None);

        let (_, transfer) = &rows[1];
        let transfer = transfer.as_ref().unwrap();
        assert_eq!(transfer.counterparty.as_deref(), Some("bob"));
        assert_eq!(transfer.amount, Some(Decimal::new(125, 2)));

        assert!(rows[2].1.is_err());

        let (line, history) = &rows[3];
        let history = history.as_ref().unwrap();
        assert_eq!(*line, 5);
        assert_eq!(history.op, OperationKind::History);
        assert_eq!(history.counterparty.as_deref(), Some("withdraw"));
    }
}
