//! PayLedger command-line client.
//!
//! Runs one ledger operation against the configured store and prints the
//! result as JSON. Accounts are addressed by name.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payledger_common::{Currency, LedgerError, RequestId, RequestStatus};
use payledger_ledger::{RequestFilter, RequestRole, TransactionCursor};
use payledger_service::{LedgerService, ServiceConfig};

/// PayLedger CLI
#[derive(Parser, Debug)]
#[command(name = "payledger")]
#[command(about = "Accounts, transfers and payment requests")]
struct Args {
    /// Database URL (`memory` or `sqlite:...`), overriding PAYLEDGER_DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account with the opening balance
    CreateAccount {
        name: String,
        /// Currency code (USD, GBP, EUR)
        #[arg(long)]
        currency: Option<Currency>,
    },
    /// Show an account's balance
    Balance { account: String },
    /// Show balance and payment counts
    Summary { account: String },
    /// Send money to another account
    Transfer {
        from: String,
        to: String,
        /// Amount in minor units
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },
    /// Ask another account for money
    Request {
        requester: String,
        target: String,
        /// Amount in minor units
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },
    /// Accept a request and pay it
    Accept {
        request_id: String,
        /// Acting account
        #[arg(long = "as")]
        actor: String,
    },
    /// Decline a request
    Reject {
        request_id: String,
        /// Acting account
        #[arg(long = "as")]
        actor: String,
    },
    /// Cancel a request you made
    Withdraw {
        request_id: String,
        /// Acting account
        #[arg(long = "as")]
        actor: String,
    },
    /// List transactions, most recent first
    History {
        account: String,
        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List payment requests
    Requests {
        account: String,
        #[arg(long, value_enum, default_value_t = Role::Any)]
        role: Role,
        #[arg(long)]
        status: Option<RequestStatus>,
    },
    /// Check every balance against the transaction log
    Verify,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Incoming,
    Outgoing,
    Any,
}

impl From<Role> for RequestRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Incoming => RequestRole::Incoming,
            Role::Outgoing => RequestRole::Outgoing,
            Role::Any => RequestRole::Any,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    if let Some(url) = args.database_url.clone() {
        config.database_url = url;
    }

    // Logs go to stderr so stdout carries only the command's JSON output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let service = LedgerService::open(config).await.map_err(report)?;
    info!(command = ?args.command, "Running command");

    run(&service, args.command).await
}

async fn run(service: &LedgerService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::CreateAccount { name, currency } => {
            let account = service.create_account(&name, currency).await.map_err(report)?;
            let balance = service.get_balance(account.id).await.map_err(report)?;
            print(&json!({
                "account": account,
                "balance": balance.to_string(),
            }))
        }
        Command::Balance { account } => {
            let account = service.find_account(&account).await.map_err(report)?;
            let balance = service.get_balance(account.id).await.map_err(report)?;
            print(&json!({
                "account": account.name,
                "balance": balance.to_string(),
                "minor_units": balance.minor,
                "currency": balance.currency,
            }))
        }
        Command::Summary { account } => {
            let account = service.find_account(&account).await.map_err(report)?;
            let summary = service.account_summary(account.id).await.map_err(report)?;
            let balance = summary.balance_str();
            print(&json!({
                "summary": summary,
                "balance": balance,
            }))
        }
        Command::Transfer { from, to, amount } => {
            let sender = service.find_account(&from).await.map_err(report)?;
            let record = service.transfer(sender.id, &to, amount).await.map_err(report)?;
            print(&record)
        }
        Command::Request {
            requester,
            target,
            amount,
        } => {
            let requester = service.find_account(&requester).await.map_err(report)?;
            let id = service
                .create_request(requester.id, &target, amount)
                .await
                .map_err(report)?;
            print(&service.get_request(id).await.map_err(report)?)
        }
        Command::Accept { request_id, actor } => {
            let id = parse_request_id(&request_id)?;
            let actor = service.find_account(&actor).await.map_err(report)?;
            let record = service.accept_request(id, actor.id).await.map_err(report)?;
            print(&record)
        }
        Command::Reject { request_id, actor } => {
            let id = parse_request_id(&request_id)?;
            let actor = service.find_account(&actor).await.map_err(report)?;
            service.reject_request(id, actor.id).await.map_err(report)?;
            print(&service.get_request(id).await.map_err(report)?)
        }
        Command::Withdraw { request_id, actor } => {
            let id = parse_request_id(&request_id)?;
            let actor = service.find_account(&actor).await.map_err(report)?;
            service.withdraw_request(id, actor.id).await.map_err(report)?;
            print(&service.get_request(id).await.map_err(report)?)
        }
        Command::History {
            account,
            cursor,
            limit,
        } => {
            let account = service.find_account(&account).await.map_err(report)?;
            let cursor = cursor
                .map(|raw| raw.parse::<TransactionCursor>())
                .transpose()
                .map_err(report)?;
            let page = service
                .list_transactions(account.id, cursor, limit)
                .await
                .map_err(report)?;
            print(&json!({
                "records": page.records,
                "next": page.next.map(|c| c.to_string()),
            }))
        }
        Command::Requests {
            account,
            role,
            status,
        } => {
            let account = service.find_account(&account).await.map_err(report)?;
            let filter = RequestFilter {
                role: role.into(),
                status,
            };
            let requests = service
                .list_requests(account.id, filter)
                .await
                .map_err(report)?;
            print(&requests)
        }
        Command::Verify => {
            let audit = service.verify_integrity().await.map_err(report)?;
            print(&audit)
        }
    }
}

fn parse_request_id(raw: &str) -> anyhow::Result<RequestId> {
    RequestId::parse(raw.trim()).with_context(|| format!("invalid request id {raw:?}"))
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Turn a ledger error into the message shown to the user.
fn report(err: LedgerError) -> anyhow::Error {
    error!(code = err.error_code(), error = %err, "Command failed");
    anyhow::anyhow!("{} [{}]", err.user_message(), err.error_code())
}
