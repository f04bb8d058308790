use std::{
    str::from_utf8,
    sync::{Arc, Mutex},
};

use mini_ledger::{
    bin_utils::{OperationError, Service},
    clock::SystemClock,
    command::CommandError,
    credential::{CredentialError, DEFAULT_SALT},
    ledger::{LedgerError, Party},
    session::AuthError,
    store::{InMemoryStore, LedgerStore, SqliteStore},
};

const TEST_FILE: &str = include_str!("operations.csv");

struct Replay {
    output: String,
    statements: String,
    errors: Vec<(u64, String)>,
}

fn run<S: LedgerStore + 'static>(store: Arc<S>) -> Replay {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let mut output = Vec::new();
    let mut statements: Vec<u8> = Vec::new();
    let service = Service {
        store,
        clock: Arc::new(SystemClock),
        salt: DEFAULT_SALT.to_string(),
        input: TEST_FILE.as_bytes(),
        output: &mut output,
        statements: Some(Box::new(&mut statements)),
        error_printer: Box::new(move |line, err: OperationError| {
            let kind = match err {
                OperationError::CredentialErr(CredentialError::AccountExists(_)) => "exists",
                OperationError::AuthErr(AuthError::SessionExpiredOrInvalid) => "session",
                OperationError::AuthErr(AuthError::InvalidCredentials) => "credentials",
                OperationError::LedgerErr(LedgerError::AccountErr(_)) => "funds",
                OperationError::LedgerErr(LedgerError::AccountNotFound {
                    side: Party::Destination,
                    ..
                }) => "missing destination",
                OperationError::CommandErr(CommandError::InvalidAmount { .. }) => "amount",
                OperationError::CommandErr(CommandError::UnknownFilter(_)) => "filter",
                other => panic!("unexpected error at line {line}: {other}"),
            };
            sink.lock().unwrap().push((line, kind.to_string()));
        }),
    };
    service.run().unwrap();
    let errors = errors.lock().unwrap().clone();
    Replay {
        output: from_utf8(&output).unwrap().to_string(),
        statements: from_utf8(&statements).unwrap().to_string(),
        errors,
    }
}

fn expected_errors() -> Vec<(u64, String)> {
    [
        (4, "exists"),
        (8, "funds"),
        (9, "session"),
        (11, "missing destination"),
        (12, "credentials"),
        (15, "amount"),
        (17, "filter"),
    ]
    .into_iter()
    .map(|(line, kind)| (line, kind.to_string()))
    .collect()
}

fn check(replay: Replay) {
    // users are printed in name order
    assert_eq!(replay.output, "username,balance\nalice,0\nbob,49.5\n");
    assert_eq!(replay.errors, expected_errors());

    let statements: Vec<_> = replay.statements.lines().collect();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0], "line,account,type,from,to,amount,timestamp");
    assert!(statements[1].starts_with("16,bob,transfer,alice,bob,60,"));
}

#[test]
fn process_operations() {
    check(run(Arc::new(InMemoryStore::new())));
}

#[test]
fn process_operations_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("ledger.db")).unwrap());
    check(run(Arc::clone(&store)));

    let store = Arc::into_inner(store).unwrap();
    store.close().unwrap();
}
