//! Bank Ledger - command line entry point
//!
//! ```text
//! bank_ledger [--env dev] migrate
//! bank_ledger [--env dev] open-account --client 7 --currency EUR
//! bank_ledger [--env dev] account 42
//! bank_ledger [--env dev] transfer --from 1 --to 2 --amount 30.00 [--timeout-ms 2000]
//! bank_ledger [--env dev] transfer --ext-from DE89... --to 2 --amount 30.00
//! ```
//!
//! Results are printed to stdout as JSON; logs go to the configured file.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use rust_decimal::Decimal;

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::ledger::{AccountId, AccountRepository, PgLedgerStore, TransactionCategory};
use bank_ledger::transfer::{TransferCoordinator, TransferRequest};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env(args: &[String]) -> String {
    get_flag(args, "--env")
        .or_else(|| get_flag(args, "-e"))
        .unwrap_or_else(|| "dev".to_string())
}

fn get_flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_flag<T>(args: &[String], name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get_flag(args, name)
        .map(|v| v.parse::<T>().with_context(|| format!("invalid value for {name}: {v}")))
        .transpose()
}

/// First argument that is neither a flag nor a flag's value
fn get_command(args: &[String]) -> Option<(usize, &str)> {
    let mut i = 1;
    while i < args.len() {
        if args[i].starts_with('-') {
            i += 2;
            continue;
        }
        return Some((i, args[i].as_str()));
    }
    None
}

fn transfer_request(args: &[String]) -> anyhow::Result<TransferRequest> {
    let amount: Decimal = parse_flag(args, "--amount")?.context("--amount is required")?;
    let category = match get_flag(args, "--category").as_deref() {
        None | Some("transfer") => TransactionCategory::Transfer,
        Some("service") => TransactionCategory::ServicePayment,
        Some(other) => bail!("unknown category: {other}"),
    };

    Ok(TransferRequest {
        source_account_id: parse_flag::<i64>(args, "--from")?.map(AccountId::new),
        dest_account_id: parse_flag::<i64>(args, "--to")?.map(AccountId::new),
        external_source_ref: get_flag(args, "--ext-from"),
        external_dest_ref: get_flag(args, "--ext-to"),
        amount,
        category,
        service_id: parse_flag(args, "--service-id")?,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = get_env(&args);

    let app_config = AppConfig::load(&env).with_context(|| format!("loading config for {env}"))?;
    let log_guard = bank_ledger::logging::init_logging(&app_config);

    tracing::info!("Starting bank ledger in {} mode", env);

    let Some((cmd_index, command)) = get_command(&args) else {
        bail!("usage: bank_ledger [--env <env>] <migrate|open-account|account|transfer> ...");
    };

    let db = Database::connect(&app_config.database)
        .await
        .context("connecting to PostgreSQL")?;

    match command {
        "migrate" => {
            db.migrate().await?;
            println!("schema ready");
        }
        "open-account" => {
            let client_id: i64 = parse_flag(&args, "--client")?.context("--client is required")?;
            let currency = get_flag(&args, "--currency").unwrap_or_else(|| "EUR".to_string());
            let account = AccountRepository::open(db.pool(), client_id, &currency).await?;
            print_json(&account)?;
        }
        "account" => {
            let id: i64 = args
                .get(cmd_index + 1)
                .context("account id is required")?
                .parse()
                .context("account id must be an integer")?;
            match AccountRepository::get_by_id(db.pool(), AccountId::new(id)).await? {
                Some(account) => print_json(&account)?,
                None => bail!("account {id} not found"),
            }
        }
        "transfer" => {
            let req = transfer_request(&args)?;
            let store = PgLedgerStore::new(db.pool().clone())
                .with_lock_timeout(app_config.database.lock_timeout());
            let coordinator = TransferCoordinator::new(Arc::new(store));

            let outcome = match parse_flag::<u64>(&args, "--timeout-ms")? {
                Some(ms) => {
                    coordinator
                        .transfer_with_timeout(req, Duration::from_millis(ms))
                        .await
                }
                None => coordinator.transfer(req).await,
            };

            match outcome {
                Ok(result) => print_json(&result)?,
                Err(e) => {
                    print_json(&serde_json::json!({
                        "code": e.code(),
                        "status": e.http_status(),
                        "retryable": e.is_retryable(),
                        "persistence": e.is_persistence(),
                        "message": e.to_string(),
                    }))?;
                    // Flush buffered log lines before exiting
                    drop(log_guard);
                    std::process::exit(1);
                }
            }
        }
        other => bail!("unknown command: {other}"),
    }

    Ok(())
}
