//! Wallet Ledger CLI
//!
//! ```text
//! wallet_ledger [--env dev] init-schema
//! wallet_ledger [--env dev] open-account <account_id> <name> [currency]
//! wallet_ledger [--env dev] deposit  <key> <account_id> <amount> [note]
//! wallet_ledger [--env dev] withdraw <key> <account_id> <amount> [note]
//! wallet_ledger [--env dev] transfer <key> <from> <to> <amount> [note]
//! wallet_ledger [--env dev] balance  <account_id>
//! wallet_ledger [--env dev] history  <account_id> [limit] [next_token]
//! ```
//!
//! Amounts are in minor units. Every command prints JSON on stdout.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;

use wallet_ledger::config::AppConfig;
use wallet_ledger::db::Database;
use wallet_ledger::logging::init_logging;
use wallet_ledger::wallet::schema::init_schema;
use wallet_ledger::wallet::{
    Account, AccountRef, DepositRequest, P2pTransferRequest, PgWalletStore, TransferError,
    WalletService, WithdrawalRequest,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Command line without the program name and the `--env` flag
fn positional_args() -> Vec<String> {
    let mut out = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env" || arg == "-e" {
            args.next();
            continue;
        }
        out.push(arg);
    }
    out
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing argument <{}>", name))
}

fn amount_arg(args: &[String], index: usize) -> anyhow::Result<i64> {
    let raw = arg(args, index, "amount")?;
    raw.parse()
        .with_context(|| format!("amount must be an integer in minor units, got {}", raw))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the result, or the error as `{code, error}` and fail the process
fn report<T: Serialize>(result: Result<T, TransferError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            print_json(&serde_json::json!({
                "code": e.code(),
                "status": e.http_status(),
                "error": e.to_string(),
            }))?;
            bail!("{}", e.code())
        }
    }
}

fn print_usage() {
    eprintln!(
        "usage: wallet_ledger [--env <env>] <init-schema|open-account|deposit|withdraw|transfer|balance|history> [args...]"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    let args = positional_args();
    let Some((command, rest)) = args.split_first() else {
        print_usage();
        return Ok(());
    };

    let postgres_url = app_config
        .postgres_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("postgres_url is not configured and DATABASE_URL is not set")?;

    tracing::info!("Starting wallet ledger in {} mode", env);
    let db = Database::connect(&postgres_url, &app_config.pool).await?;
    let store = Arc::new(PgWalletStore::new(db.pool().clone()));
    let wallet = &app_config.wallet;
    let service = WalletService::from_config(store.clone(), store.clone(), wallet);
    let default_currency = wallet
        .supported_currencies
        .first()
        .cloned()
        .unwrap_or_else(|| "MYR".to_string());

    match command.as_str() {
        "init-schema" => {
            init_schema(db.pool()).await?;
            let holding = Account::system(&wallet.holding_account_id, &default_currency);
            let created = store.open_account(&holding).await?;
            print_json(&serde_json::json!({
                "holdingAccountID": wallet.holding_account_id,
                "created": created,
            }))
        }
        "open-account" => {
            let currency = rest.get(2).cloned().unwrap_or(default_currency);
            let account = Account::new(
                arg(rest, 0, "account_id")?,
                arg(rest, 1, "name")?,
                currency,
                0,
            );
            let created = store.open_account(&account).await?;
            print_json(&serde_json::json!({
                "accountID": account.account_id,
                "created": created,
            }))
        }
        "deposit" => {
            let req = DepositRequest {
                idempotency_key: arg(rest, 0, "key")?.to_string(),
                account_id: arg(rest, 1, "account_id")?.to_string(),
                amount: amount_arg(rest, 2)?,
                currency: default_currency,
                note: rest.get(3).cloned().unwrap_or_default(),
            };
            report(service.deposit(&req).await)
        }
        "withdraw" => {
            let req = WithdrawalRequest {
                idempotency_key: arg(rest, 0, "key")?.to_string(),
                account_id: arg(rest, 1, "account_id")?.to_string(),
                amount: amount_arg(rest, 2)?,
                currency: default_currency,
                note: rest.get(3).cloned().unwrap_or_default(),
            };
            report(service.withdraw(&req).await)
        }
        "transfer" => {
            let req = P2pTransferRequest {
                idempotency_key: arg(rest, 0, "key")?.to_string(),
                currency: default_currency,
                amount: amount_arg(rest, 3)?,
                source_account: AccountRef {
                    number: arg(rest, 1, "from")?.to_string(),
                },
                destination_account: AccountRef {
                    number: arg(rest, 2, "to")?.to_string(),
                },
                properties: None,
                note: rest.get(4).cloned().unwrap_or_default(),
            };
            report(service.transfer(&req).await)
        }
        "balance" => report(
            service
                .account_details(arg(rest, 0, "account_id")?)
                .await,
        ),
        "history" => {
            let limit = rest
                .get(1)
                .map(|raw| raw.parse::<u32>())
                .transpose()
                .context("limit must be a positive integer")?;
            report(
                service
                    .account_transactions(
                        arg(rest, 0, "account_id")?,
                        limit,
                        rest.get(2).map(String::as_str),
                    )
                    .await,
            )
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}
