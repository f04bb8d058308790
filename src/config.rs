use std::path::PathBuf;

use clap::Parser;

use crate::{credential::DEFAULT_SALT, logging::LogFormat};

/// Replays a CSV file of ledger operations and prints the resulting balances.
#[derive(Parser, Debug)]
#[command(name = "mini-ledger", version, about)]
pub struct Config {
    /// CSV file with `op,user,secret,counterparty,amount` rows.
    pub input: PathBuf,

    /// SQLite database file. Without it, state lives in memory only.
    #[arg(long, env = "MINI_LEDGER_DATABASE")]
    pub database: Option<PathBuf>,

    /// Where to write records returned by `history` rows, as CSV.
    #[arg(long, env = "MINI_LEDGER_STATEMENTS")]
    pub statements: Option<PathBuf>,

    /// Process-wide salt mixed into password digests.
    #[arg(long, env = "MINI_LEDGER_SALT", default_value = DEFAULT_SALT, hide_env_values = true)]
    pub salt: String,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "MINI_LEDGER_LOG", default_value = "warn")]
    pub log_level: String,

    #[arg(long, env = "MINI_LEDGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli_structure() {
        Config::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["mini-ledger", "ops.csv"]).unwrap();
        assert_eq!(config.input, PathBuf::from("ops.csv"));
        assert_eq!(config.salt, DEFAULT_SALT);
        assert_eq!(config.statements, None);
        assert_eq!(config.log_format, LogFormat::Pretty);

        let config = Config::try_parse_from([
            "mini-ledger",
            "ops.csv",
            "--database",
            "ledger.db",
            "--statements",
            "statements.csv",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.database, Some(PathBuf::from("ledger.db")));
        assert_eq!(config.statements, Some(PathBuf::from("statements.csv")));
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
