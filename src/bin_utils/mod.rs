//! This module could be a separate crate on its own, to bootstrap [`crate::ledger`] within binary
//! but for simplicitly purposes, I include this module directly in binary.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::{Read, Write},
    sync::Arc,
};

use anyhow::Result;
use thiserror::Error;

use crate::{
    clock::Clock,
    command::{CommandError, HistoryFilter, LedgerCommand, TransactionKind},
    credential::{CredentialError, Credentials},
    ledger::{Ledger, LedgerError},
    session::{AuthError, Authenticator, Session},
    store::LedgerStore,
};
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{AccountBalance, StatementLine, print_rows};
pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error("Password is required to {0}")]
    SecretRequired(&'static str),
    #[error(transparent)]
    CredentialErr(#[from] CredentialError),
    #[error(transparent)]
    AuthErr(#[from] AuthError),
    #[error(transparent)]
    CommandErr(#[from] CommandError),
    #[error(transparent)]
    LedgerErr(#[from] LedgerError),
}

/// Replays operations through the same path a network caller would take:
/// every money movement and history request is authorized by the session its
/// user last logged in with.
///
/// Final balances go to `output`. Records returned by `history` rows go to
/// `statements` when one is given and are dropped otherwise.
pub struct Service<'w, S, R, W: 'w> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub salt: String,
    pub input: R,
    pub output: &'w mut W,
    pub statements: Option<Box<dyn Write + 'w>>,
    pub error_printer: Box<dyn FnMut(u64, OperationError)>,
}

struct Runner<S> {
    credentials: Credentials<S>,
    auth: Authenticator<S>,
    ledger: Ledger<S>,
    tokens: BTreeMap<String, String>,
    users: BTreeSet<String>,
    statements: Vec<StatementLine>,
}

impl<S: LedgerStore> Runner<S> {
    fn apply(&mut self, line: u64, row: Operation) -> Result<(), OperationError> {
        let Operation {
            op,
            user,
            secret,
            counterparty,
            amount,
        } = row;
        let kind = match op {
            OperationKind::Register => {
                let password = secret.ok_or(OperationError::SecretRequired("register"))?;
                self.credentials.register(&user, &password)?;
                self.users.insert(user);
                return Ok(());
            }
            OperationKind::Login => {
                let password = secret.ok_or(OperationError::SecretRequired("login"))?;
                let session = self.auth.login(&user, &password)?;
                self.users.insert(user.clone());
                self.tokens.insert(user, session.token().to_string());
                return Ok(());
            }
            OperationKind::Deposit => TransactionKind::Deposit,
            OperationKind::Withdraw => TransactionKind::Withdraw,
            OperationKind::Transfer => TransactionKind::Transfer,
            OperationKind::History => {
                let session = self.authenticate(&user)?;
                let filter = counterparty
                    .as_deref()
                    .unwrap_or_default()
                    .parse::<HistoryFilter>()?;
                let records = self.ledger.history(session.username(), filter)?;
                tracing::debug!(user = session.username(), found = records.len(), "history");
                self.statements.extend(
                    records
                        .into_iter()
                        .map(|record| StatementLine::new(line, session.username(), record)),
                );
                return Ok(());
            }
        };

        let session = self.authenticate(&user)?;
        let command = LedgerCommand::parse_command(kind, amount, counterparty)?;
        tracing::debug!(user = session.username(), kind = %command.kind(), "replaying");
        self.ledger.execute(session.username(), command)?;
        Ok(())
    }

    fn authenticate(&self, user: &str) -> Result<Session, AuthError> {
        let token = self.tokens.get(user).map(String::as_str).unwrap_or_default();
        self.auth.authenticate(token, user)
    }
}

impl<'w, S, R, W> Service<'w, S, R, W>
where
    S: LedgerStore,
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);

        let credentials = Credentials::new(Arc::clone(&self.store), self.salt);
        let mut runner = Runner {
            auth: Authenticator::new(
                Arc::clone(&self.store),
                credentials.clone(),
                Arc::clone(&self.clock),
            ),
            ledger: Ledger::new(
                Arc::clone(&self.store),
                credentials.clone(),
                Arc::clone(&self.clock),
            ),
            credentials,
            tokens: BTreeMap::new(),
            users: BTreeSet::new(),
            statements: Vec::new(),
        };

        for (line, row) in parser {
            let res = row
                .map_err(OperationError::from)
                .and_then(|row| runner.apply(line, row));
            if let Err(err) = res {
                (self.error_printer)(line, err);
            }
        }

        let mut balances = Vec::with_capacity(runner.users.len());
        for username in &runner.users {
            balances.push(AccountBalance {
                username: username.clone(),
                balance: runner.ledger.balance(username)?,
            });
        }
        print_rows(self.output, balances)?;

        if let Some(statements) = self.statements.as_mut() {
            print_rows(statements, runner.statements)?;
        }
        Ok(())
    }
}
