//! PayLedger Simulator
//!
//! Drives a ledger with many concurrent transfers and payment requests,
//! then checks that no money was created or destroyed.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;

use controller::{SimulationController, SimulationPlan};
use payledger_service::{LedgerService, ServiceConfig};

/// PayLedger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent load simulation for PayLedger")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "8")]
    accounts: usize,

    /// Number of operations to run
    #[arg(short, long, default_value = "500")]
    operations: usize,

    /// Operations in flight at once
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Database URL (`memory` or `sqlite:...`), overriding PAYLEDGER_DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,simulator=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.accounts < 2 {
        anyhow::bail!("the simulation needs at least two accounts");
    }

    let mut config = ServiceConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    info!(
        accounts = args.accounts,
        operations = args.operations,
        concurrency = args.concurrency,
        database_url = %config.database_url,
        "Starting PayLedger simulator"
    );

    let service = LedgerService::open(config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open ledger: {e}"))?;

    let plan = SimulationPlan::generate(args.accounts, args.operations, args.seed);
    let controller = SimulationController::new(service, args.concurrency);
    let outcome = controller.run(&plan).await;

    let metrics = controller.metrics().await;
    info!(
        total = metrics.total_operations,
        succeeded = metrics.successful_operations,
        refused = metrics.refused_operations,
        failed = metrics.failed_operations,
        avg_latency_us = metrics.average_latency_us(),
        p99_latency_us = metrics.p99_latency_us(),
        "Simulation complete"
    );
    for (code, count) in &metrics.refusals {
        info!(code = %code, count, "Refusals by reason");
    }

    match outcome {
        Ok(report) => {
            info!(
                holdings = report.holdings,
                transactions = report.transactions,
                "Ledger balanced"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Simulation found a ledger inconsistency");
            Err(e)
        }
    }
}
