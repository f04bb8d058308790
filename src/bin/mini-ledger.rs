use std::{
    fs::File,
    io::{Write, stdout},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use mini_ledger::{
    bin_utils::{OperationError, Service},
    clock::SystemClock,
    config::Config,
    ledger::LedgerError,
    logging::init_logging,
    store::{InMemoryStore, LedgerStore, SqliteStore},
};

fn report(line: u64, err: OperationError) {
    match err {
        OperationError::LedgerErr(LedgerError::AccountErr(err)) => {
            // rejected by balance rules, not a problem with the input
            tracing::info!(line, %err, "operation declined");
        }
        err => eprintln!("Error at line {line}: {err}"),
    }
}

fn replay<S: LedgerStore>(config: &Config, store: Arc<S>) -> Result<()> {
    let input = File::open(&config.input)
        .with_context(|| format!("Failed to open `{}`", config.input.display()))?;
    let statements = config
        .statements
        .as_ref()
        .map(|path| {
            File::create(path)
                .map(|file| Box::new(file) as Box<dyn Write>)
                .with_context(|| format!("Failed to create `{}`", path.display()))
        })
        .transpose()?;
    let service = Service {
        store,
        clock: Arc::new(SystemClock),
        salt: config.salt.clone(),
        input,
        output: &mut stdout(),
        statements,
        error_printer: Box::new(report),
    };
    service.run()
}

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level, config.log_format);

    match &config.database {
        Some(path) => {
            let store = Arc::new(
                SqliteStore::open(path)
                    .with_context(|| format!("Failed to open database `{}`", path.display()))?,
            );
            replay(&config, Arc::clone(&store))?;
            let store = Arc::into_inner(store).context("Store is still in use at shutdown")?;
            store.close().context("Failed to close database")
        }
        None => replay(&config, Arc::new(InMemoryStore::new())),
    }
}
