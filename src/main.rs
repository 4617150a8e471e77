use std::{error::Error, process::ExitCode, str::FromStr, sync::Arc};

use clap::Parser;
use minibank::{
    config::{Backend, CliArgs, Command, Config},
    storage::{DurableStore, InMemoryStore},
    AccountQueries, LedgerRepository, TransferOrchestrator,
};
use minibank_core::{parse_amount, Account, Currency, TransferRequest};
use minibank_sqlite::SqliteStore;
use prettytable::{row, Table};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config);

    match run(&cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn DurableStore>, Box<dyn Error>> {
    let store: Arc<dyn DurableStore> = match config.storage.backend {
        Backend::Memory => {
            tracing::info!("Using in-memory store");
            Arc::new(InMemoryStore::new())
        }
        Backend::Sqlite => {
            let path = config.storage.path.to_string_lossy();
            tracing::info!(path = %path, "Using SQLite store");
            Arc::new(SqliteStore::new(&path)?)
        }
    };

    for seed in &config.seed.accounts {
        store.provision_account(&Account::from(seed))?;
    }
    Ok(store)
}

fn run(command: &Command, config: &Config) -> Result<(), Box<dyn Error>> {
    let repository = Arc::new(LedgerRepository::new(open_store(config)?));
    repository.warm_up()?;
    let queries = AccountQueries::new(repository.clone());

    match command {
        Command::Accounts => {
            let mut table = Table::new();
            table.set_titles(row!["Account", "Currency", "Balance", "Status"]);
            for account in queries.list_accounts()? {
                table.add_row(row![account.account_id, account.currency, account.balance, account.status]);
            }
            table.printstd();
        }
        Command::Balance { account_id } => {
            let balance = queries.account_balance(*account_id)?;
            let mut table = Table::new();
            table.set_titles(row!["Account", "Currency", "Balance"]);
            table.add_row(row![balance.account_id, balance.currency, balance.balance]);
            table.printstd();
        }
        Command::Statement { account_id } => {
            let lines = queries.mini_statement(*account_id)?;
            if lines.is_empty() {
                println!("No transactions for account {}", account_id);
                return Ok(());
            }
            let mut table = Table::new();
            table.set_titles(row!["Date", "Direction", "Counterparty", "Amount", "Currency", "Reference"]);
            for line in lines {
                table.add_row(row![
                    line.timestamp,
                    line.direction,
                    line.counterparty,
                    line.amount,
                    line.currency,
                    line.reference_id
                ]);
            }
            table.printstd();
        }
        Command::Transfer {
            from,
            to,
            amount,
            currency,
            idempotency_key,
            reference,
        } => {
            let request = TransferRequest {
                sender: *from,
                receiver: *to,
                amount: parse_amount(amount)?,
                currency: Currency::from_str(currency)?,
                idempotency_key: idempotency_key.clone(),
                reference_id: reference
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            };
            let orchestrator = TransferOrchestrator::new(repository, config.transfer.execution);
            let confirmation = orchestrator.transfer(&request)?;

            let mut table = Table::new();
            table.set_titles(row!["Transaction", "From", "To", "Amount", "Status"]);
            table.add_row(row![
                confirmation.transaction_id,
                confirmation.sender,
                confirmation.receiver,
                confirmation.amount,
                confirmation.status
            ]);
            table.printstd();
        }
    }
    Ok(())
}
