/// Balance rules for a single account.
/// State is modified using events, which are created by handling credits and debits
pub mod account;

/// Validated ledger commands, transaction kinds and history filters.
pub mod command;

pub mod clock;

/// Account identities and password digests.
pub mod credential;

/// Login and session validation.
pub mod session;

/// Immutable transaction log entries.
pub mod record;

/// Deposit, withdraw and transfer over a [`store::LedgerStore`].
pub mod ledger;

/// Storage interface, plus "in memory" and SQLite implementations.
///
/// All money movement goes through [`store::LedgerStore::atomically`], so a
/// backend only has to make that one call all-or-nothing and serialized per
/// account to keep balances consistent.
pub mod store;

pub mod config;

pub mod logging;

/// Ideally, this module should exists on its own crate, as a way to
/// bootstrap core logic. However, I want to use it for integration test
/// so I put it here.
pub mod bin_utils;
