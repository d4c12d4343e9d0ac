//! Ledger command-line interface

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_engine::types::{AccountId, Currency, NewAccount, TransferRequest};
use ledger_engine::{Config, Ledger};
use serde::Serialize;

/// Double-entry ledger backed by RocksDB
#[derive(Parser)]
#[command(name = "ledger", version, about, long_about = None)]
struct Cli {
    /// TOML config file (defaults to LEDGER_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config
    #[arg(long, global = true, env = "LEDGER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new account
    OpenAccount {
        /// Account owner
        #[arg(long)]
        owner: String,
        /// Currency code (USD, EUR, CAD, RUB)
        #[arg(long)]
        currency: Currency,
        /// Opening balance in the smallest currency unit
        #[arg(long, default_value_t = 0)]
        balance: i64,
    },

    /// Move money between two accounts
    Transfer {
        /// Source account ID
        #[arg(long)]
        from: i64,
        /// Destination account ID
        #[arg(long)]
        to: i64,
        /// Amount in the smallest currency unit
        #[arg(long)]
        amount: i64,
        /// Give up and roll back after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show one account
    Account {
        /// Account ID
        id: i64,
    },

    /// List entries recorded against an account
    Entries {
        /// Account ID
        account: i64,
    },

    /// Compare an account's balance with the sum of its entries
    Audit {
        /// Account ID
        account: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::from_env().context("invalid LEDGER_* environment")?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let ledger = Ledger::open(config)
        .await
        .context("failed to open ledger")?;

    match cli.command {
        Commands::OpenAccount {
            owner,
            currency,
            balance,
        } => {
            let account = ledger
                .create_account(NewAccount::new(owner, currency).with_balance(balance))
                .await?;
            print_json(&account)
        }
        Commands::Transfer {
            from,
            to,
            amount,
            timeout_ms,
        } => {
            let request = TransferRequest::new(AccountId::new(from), AccountId::new(to), amount);
            let result = match timeout_ms {
                Some(ms) => {
                    ledger
                        .transfer_with_timeout(request, Duration::from_millis(ms))
                        .await
                }
                None => ledger.transfer(request).await,
            };
            match result {
                Ok(result) => print_json(&result),
                Err(e) => Err(anyhow::anyhow!("{} ({})", e, e.kind().as_str())),
            }
        }
        Commands::Account { id } => print_json(&ledger.get_account(AccountId::new(id)).await?),
        Commands::Entries { account } => {
            print_json(&ledger.list_entries(AccountId::new(account)).await?)
        }
        Commands::Audit { account } => {
            let audit = ledger.audit_account(AccountId::new(account)).await?;
            print_json(&audit)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
