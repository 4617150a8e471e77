use std::path::PathBuf;

use clap::{Parser, Subcommand};
use minibank_core::{Account, AccountId, AccountStatus, Currency};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::transfer::ExecutionMode;

#[derive(Parser, Debug)]
#[command(name = "minibank", about = "MiniBank - account ledger and funds transfers")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "minibank.toml")]
    pub config: String,

    /// SQLite database path (overrides config file)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List every account with its balance and status
    Accounts,
    /// Show the balance of one account
    Balance { account_id: AccountId },
    /// Show the most recent transactions of one account
    Statement { account_id: AccountId },
    /// Move funds between two accounts
    Transfer {
        #[arg(long)]
        from: AccountId,
        #[arg(long)]
        to: AccountId,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        currency: String,
        #[arg(long)]
        idempotency_key: String,
        /// Correlation id recorded with the transaction; generated when absent
        #[arg(long)]
        reference: Option<String>,
    },
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TransferConfig {
    #[serde(default)]
    pub execution: ExecutionMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SeedConfig {
    /// Accounts provisioned on start-up when absent from the store.
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedAccount {
    pub account_id: AccountId,
    pub currency: Currency,
    pub balance: Decimal,
    #[serde(default)]
    pub status: AccountStatus,
}

impl From<&SeedAccount> for Account {
    fn from(seed: &SeedAccount) -> Self {
        Account {
            account_id: seed.account_id,
            currency: seed.currency,
            balance: seed.balance,
            status: seed.status,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("minibank.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: Backend::default(),
            path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(ref path) = cli.database {
            config.storage.path = path.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
