//! Simulation controller.
//!
//! A plan is generated up front from a seed so a run can be replayed; the
//! controller then executes it against a [`LedgerService`] with bounded
//! concurrency and audits the ledger afterwards.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{debug, info};

use payledger_common::{AccountId, Currency, LedgerError, RequestId};
use payledger_ledger::IntegrityReport;
use payledger_service::LedgerService;

use crate::metrics::SimulationMetrics;

/// What the payer does with a generated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    Withdraw,
    Leave,
}

/// One planned step. Accounts are indexes into the plan's account list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Transfer {
        from: usize,
        to: usize,
        amount: i64,
    },
    Request {
        requester: usize,
        target: usize,
        amount: i64,
        decision: Decision,
    },
}

/// Seeded list of accounts and operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationPlan {
    pub seed: u64,
    pub currencies: Vec<Currency>,
    pub operations: Vec<Operation>,
}

impl SimulationPlan {
    /// Generate a plan. Every fourth account holds euros so cross-currency
    /// refusals show up alongside the usual ones.
    pub fn generate(accounts: usize, operations: usize, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let currencies = (0..accounts)
            .map(|i| if i % 4 == 3 { Currency::Eur } else { Currency::Gbp })
            .collect();

        let operations = (0..operations)
            .map(|_| {
                let from = rng.gen_range(0..accounts);
                // Occasionally aim at ourselves or send a bad amount.
                let to = if rng.gen_ratio(1, 50) {
                    from
                } else {
                    (from + rng.gen_range(1..accounts)) % accounts
                };
                let amount = if rng.gen_ratio(1, 50) {
                    -rng.gen_range(0..10)
                } else {
                    rng.gen_range(1..=400)
                };

                if rng.gen_bool(0.6) {
                    Operation::Transfer { from, to, amount }
                } else {
                    let decision = match rng.gen_range(0..10) {
                        0..=4 => Decision::Accept,
                        5..=6 => Decision::Reject,
                        7..=8 => Decision::Withdraw,
                        _ => Decision::Leave,
                    };
                    Operation::Request {
                        requester: to,
                        target: from,
                        amount,
                        decision,
                    }
                }
            })
            .collect();

        Self {
            seed,
            currencies,
            operations,
        }
    }
}

struct SimAccount {
    id: AccountId,
    name: String,
    currency: Currency,
}

/// Controls the simulation.
pub struct SimulationController {
    service: LedgerService,
    concurrency: usize,
    metrics: RwLock<SimulationMetrics>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(service: LedgerService, concurrency: usize) -> Self {
        Self {
            service,
            concurrency: concurrency.max(1),
            metrics: RwLock::new(SimulationMetrics::new()),
        }
    }

    /// Run a plan, then check that per-currency totals are unchanged and
    /// that the audit log reproduces every balance.
    pub async fn run(&self, plan: &SimulationPlan) -> anyhow::Result<IntegrityReport> {
        let accounts = self.open_accounts(plan).await?;
        let before = self.totals(&accounts).await?;
        info!(accounts = accounts.len(), seed = plan.seed, "Accounts opened");

        let started = Instant::now();
        stream::iter(plan.operations.iter())
            .for_each_concurrent(self.concurrency, |op| self.execute(&accounts, op))
            .await;
        info!(
            operations = plan.operations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plan executed"
        );

        let after = self.totals(&accounts).await?;
        if before != after {
            anyhow::bail!("money was not conserved: totals went from {before:?} to {after:?}");
        }

        self.service
            .verify_integrity()
            .await
            .map_err(|e| anyhow::anyhow!("integrity audit failed: {e}"))
    }

    /// Snapshot of the metrics so far.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    async fn open_accounts(&self, plan: &SimulationPlan) -> anyhow::Result<Vec<SimAccount>> {
        let mut accounts = Vec::with_capacity(plan.currencies.len());
        for (i, currency) in plan.currencies.iter().enumerate() {
            let name = format!("sim{:x}-{i}", plan.seed);
            let account = self
                .service
                .create_account(&name, Some(*currency))
                .await
                .map_err(|e| anyhow::anyhow!("failed to open account {name}: {e}"))?;
            accounts.push(SimAccount {
                id: account.id,
                name,
                currency: *currency,
            });
        }
        Ok(accounts)
    }

    async fn totals(&self, accounts: &[SimAccount]) -> anyhow::Result<BTreeMap<Currency, u128>> {
        let mut totals = BTreeMap::new();
        for account in accounts {
            let balance = self
                .service
                .get_balance(account.id)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read balance of {}: {e}", account.name))?;
            *totals.entry(account.currency).or_insert(0u128) += u128::from(balance.minor);
        }
        Ok(totals)
    }

    async fn execute(&self, accounts: &[SimAccount], op: &Operation) {
        match *op {
            Operation::Transfer { from, to, amount } => {
                let started = Instant::now();
                let result = self
                    .service
                    .transfer(accounts[from].id, &accounts[to].name, amount)
                    .await;
                self.record("transfer", &result, started).await;
            }
            Operation::Request {
                requester,
                target,
                amount,
                decision,
            } => {
                let started = Instant::now();
                let result = self
                    .service
                    .create_request(accounts[requester].id, &accounts[target].name, amount)
                    .await;
                self.record("request", &result, started).await;

                if let Ok(request_id) = result {
                    self.decide(request_id, &accounts[requester], &accounts[target], decision)
                        .await;
                }
            }
        }
    }

    async fn decide(
        &self,
        request_id: RequestId,
        requester: &SimAccount,
        target: &SimAccount,
        decision: Decision,
    ) {
        let started = Instant::now();
        match decision {
            Decision::Accept => {
                let result = self.service.accept_request(request_id, target.id).await;
                self.record("accept", &result, started).await;
            }
            Decision::Reject => {
                let result = self.service.reject_request(request_id, target.id).await;
                self.record("reject", &result, started).await;
            }
            Decision::Withdraw => {
                let result = self.service.withdraw_request(request_id, requester.id).await;
                self.record("withdraw", &result, started).await;
            }
            Decision::Leave => {}
        }
    }

    async fn record<T>(&self, what: &str, result: &Result<T, LedgerError>, started: Instant) {
        if let Err(e) = result {
            debug!(operation = what, code = e.error_code(), "Operation refused");
        }
        self.metrics.write().await.record(result, started.elapsed());
    }
}
