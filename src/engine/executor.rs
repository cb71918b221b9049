//! Execution orchestrator.
//!
//! Turns a non-hold decision into an onchain-actions order request, obtains
//! the unsigned plan, and either records it (simulate) or sends each
//! transaction through the wallet and follows the order to a terminal
//! lifecycle state (execute).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::onchain::{
    CloseParams, ExecutionPlan, LifecycleQuery, LifecycleReport, LifecycleStatus, OnchainActions,
    OnchainError, OpenParams, OrderRequest, ReduceParams, TxKind,
};
use crate::strategy::{Action, Decision};
use crate::types::{to_raw_units, Market, Side, TxStatus};
use crate::wallet::{ReceiptStatus, WalletClient};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How plans are submitted. Fixed for the lifetime of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Build plans only.
    #[default]
    Simulate,
    /// Sign, send and follow plans to completion.
    Execute,
}

/// Bounds on lifecycle polling after an order transaction is mined.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Confirmed,
    Blocked,
    ApprovalOnly,
    Pending,
    Failed,
    Rejected,
}

/// Payload of the `gmx-allora-execution-result` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tx_hashes: Vec<String>,
    pub last_tx_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Simulate mode: plan built, nothing sent.
    Simulated,
    /// Order mined and filled.
    Confirmed {
        tx_hashes: Vec<String>,
        order_tx_hash: String,
    },
    /// Every transaction was an approval; the order still has to be placed.
    ApprovalOnly { tx_hashes: Vec<String> },
    /// Lifecycle never reached a terminal state within the polling budget.
    Unresolved {
        tx_hashes: Vec<String>,
        order_tx_hash: String,
    },
    /// Sending, mining or the order itself failed.
    Failed {
        tx_hashes: Vec<String>,
        error: String,
    },
    /// Plan construction was refused by the order simulation.
    ConstructionRejected { message: String },
}

impl ExecutionOutcome {
    pub fn tx_hashes(&self) -> &[String] {
        match self {
            ExecutionOutcome::Confirmed { tx_hashes, .. }
            | ExecutionOutcome::ApprovalOnly { tx_hashes }
            | ExecutionOutcome::Unresolved { tx_hashes, .. }
            | ExecutionOutcome::Failed { tx_hashes, .. } => tx_hashes,
            ExecutionOutcome::Simulated | ExecutionOutcome::ConstructionRejected { .. } => &[],
        }
    }

    pub fn last_tx_hash(&self) -> Option<&str> {
        self.tx_hashes().last().map(String::as_str)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failed { error, .. } => Some(error),
            ExecutionOutcome::ConstructionRejected { message } => Some(message),
            _ => None,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Simulated => ExecutionStatus::Blocked,
            ExecutionOutcome::Confirmed { .. } => ExecutionStatus::Confirmed,
            ExecutionOutcome::ApprovalOnly { .. } => ExecutionStatus::ApprovalOnly,
            ExecutionOutcome::Unresolved { .. } => ExecutionStatus::Pending,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
            ExecutionOutcome::ConstructionRejected { .. } => ExecutionStatus::Rejected,
        }
    }

    /// Status of the history entry this outcome produces, if any.
    pub fn tx_status(&self) -> Option<TxStatus> {
        match self {
            ExecutionOutcome::Confirmed { .. } => Some(TxStatus::Success),
            ExecutionOutcome::ApprovalOnly { .. } | ExecutionOutcome::Unresolved { .. } => {
                Some(TxStatus::Pending)
            }
            ExecutionOutcome::Failed { .. } => Some(TxStatus::Failed),
            ExecutionOutcome::Simulated | ExecutionOutcome::ConstructionRejected { .. } => None,
        }
    }

    pub fn result(&self) -> ExecutionResult {
        let status = self.status();
        ExecutionResult {
            ok: !matches!(status, ExecutionStatus::Failed | ExecutionStatus::Rejected),
            status,
            error: self.error().map(str::to_string),
            tx_hashes: self.tx_hashes().to_vec(),
            last_tx_hash: self.last_tx_hash().map(str::to_string),
        }
    }
}

/// What happened to one decided action.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub request: Option<OrderRequest>,
    pub plan: Option<ExecutionPlan>,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    /// The action took effect: filled onchain, or simulated with an order in
    /// the plan.
    pub fn settled(&self) -> bool {
        match &self.outcome {
            ExecutionOutcome::Confirmed { .. } => true,
            ExecutionOutcome::Simulated => self.plan.as_ref().is_some_and(|p| p.order_count() > 0),
            _ => false,
        }
    }

    /// The plan only approved tokens, so the open must be retried.
    pub fn approval_only(&self) -> bool {
        match &self.outcome {
            ExecutionOutcome::ApprovalOnly { .. } => true,
            ExecutionOutcome::Simulated => self.plan.as_ref().is_some_and(ExecutionPlan::is_approval_only),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ExecutionOrchestrator {
    client: Arc<dyn OnchainActions>,
    wallet: Option<Arc<dyn WalletClient>>,
    mode: ExecutionMode,
    lifecycle: LifecyclePolicy,
    provider_name: String,
    wallet_address: String,
}

impl ExecutionOrchestrator {
    pub fn new(
        client: Arc<dyn OnchainActions>,
        mode: ExecutionMode,
        provider_name: &str,
        wallet_address: &str,
    ) -> Self {
        Self {
            client,
            wallet: None,
            mode,
            lifecycle: LifecyclePolicy::default(),
            provider_name: provider_name.to_string(),
            wallet_address: wallet_address.to_string(),
        }
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn WalletClient>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_lifecycle_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.lifecycle = policy;
        self
    }

    /// Order request for a decided action. `Ok(None)` for holds.
    pub fn build_request(&self, decision: &Decision, market: &Market) -> Result<Option<OrderRequest>, String> {
        let request = match &decision.action {
            Action::Hold(_) => return Ok(None),
            Action::Open { side, order } => {
                let collateral = &market.short_token;
                let amount = to_raw_units(order.collateral_usd, collateral.decimals).ok_or_else(|| {
                    format!("collateral {} overflows {} units", order.collateral_usd, collateral.symbol)
                })?;
                let params = OpenParams {
                    wallet_address: self.wallet_address.clone(),
                    chain_id: market.chain_id,
                    market_address: market.market_address.clone(),
                    collateral_token_address: collateral.address.clone(),
                    pay_token_address: collateral.address.clone(),
                    amount,
                    leverage: order.leverage,
                    size_usd: order.size_usd,
                };
                match side {
                    Side::Long => OrderRequest::Long(params),
                    Side::Short => OrderRequest::Short(params),
                }
            }
            Action::Close { side, .. } => OrderRequest::Close(CloseParams {
                wallet_address: self.wallet_address.clone(),
                chain_id: market.chain_id,
                market_address: market.market_address.clone(),
                position_side: *side,
            }),
            Action::Reduce { side, size_usd } => OrderRequest::Reduce(ReduceParams {
                wallet_address: self.wallet_address.clone(),
                chain_id: market.chain_id,
                market_address: market.market_address.clone(),
                position_side: *side,
                size_delta_usd: size_usd.round_dp(2).max(Decimal::ZERO),
            }),
        };
        Ok(Some(request))
    }

    /// Carry out a decision. `None` when the decision is a hold.
    pub async fn execute(&self, decision: &Decision, market: &Market) -> Option<ExecutionReport> {
        let request = match self.build_request(decision, market) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(error) => {
                warn!(error = %error, "Could not build order request");
                return Some(ExecutionReport {
                    request: None,
                    plan: None,
                    outcome: ExecutionOutcome::Failed {
                        tx_hashes: Vec::new(),
                        error: format!("GMX order failed: {error}"),
                    },
                });
            }
        };

        info!(request = %request, mode = ?self.mode, "Requesting GMX plan");

        let plan = match self.client.create_perpetual_order(&request).await {
            Ok(plan) => plan,
            Err(OnchainError::OrderRejected { message, .. }) => {
                warn!(request = %request, error = %message, "GMX order simulation rejected");
                return Some(ExecutionReport {
                    request: Some(request),
                    plan: None,
                    outcome: ExecutionOutcome::ConstructionRejected { message },
                });
            }
            Err(e) => {
                warn!(request = %request, error = %e, "GMX plan request failed");
                return Some(ExecutionReport {
                    request: Some(request),
                    plan: None,
                    outcome: ExecutionOutcome::Failed {
                        tx_hashes: Vec::new(),
                        error: format!("GMX order failed: could not build plan: {e}"),
                    },
                });
            }
        };

        let outcome = if plan.transactions.is_empty() {
            ExecutionOutcome::Failed {
                tx_hashes: Vec::new(),
                error: "GMX order failed: plan contained no transactions".into(),
            }
        } else {
            match self.mode {
                ExecutionMode::Simulate => {
                    info!(
                        transactions = plan.transactions.len(),
                        approval_only = plan.is_approval_only(),
                        "[SIMULATE] Plan built, not submitted"
                    );
                    ExecutionOutcome::Simulated
                }
                ExecutionMode::Execute => self.submit(&plan).await,
            }
        };

        Some(ExecutionReport {
            request: Some(request),
            plan: Some(plan),
            outcome,
        })
    }

    /// Send each transaction in order, wait for its receipt, then follow the
    /// order transaction's lifecycle.
    async fn submit(&self, plan: &ExecutionPlan) -> ExecutionOutcome {
        let Some(wallet) = self.wallet.as_ref() else {
            return ExecutionOutcome::Failed {
                tx_hashes: Vec::new(),
                error: "GMX order failed: execute mode has no wallet client".into(),
            };
        };

        let mut tx_hashes = Vec::new();
        let mut order_tx = None;

        for tx in &plan.transactions {
            let hash = match wallet.send_transaction(tx).await {
                Ok(hash) => hash,
                Err(e) => {
                    return ExecutionOutcome::Failed {
                        tx_hashes,
                        error: format!("GMX order failed: {e}"),
                    }
                }
            };
            tx_hashes.push(hash.clone());

            match wallet.wait_for_transaction_receipt(&hash).await {
                Ok(receipt) if receipt.status == ReceiptStatus::Success => {
                    debug!(tx_hash = %hash, kind = ?tx.kind, "Transaction mined");
                }
                Ok(_) => {
                    return ExecutionOutcome::Failed {
                        tx_hashes,
                        error: format!("GMX order failed: transaction {hash} reverted"),
                    }
                }
                Err(e) => {
                    return ExecutionOutcome::Failed {
                        tx_hashes,
                        error: format!("GMX order failed: {e}"),
                    }
                }
            }

            if tx.kind == TxKind::Order {
                order_tx = Some((hash, tx.chain_id));
            }
        }

        let Some((order_tx_hash, chain_id)) = order_tx else {
            info!(tx_hashes = ?tx_hashes, "Plan contained only approvals; order pending next cycle");
            return ExecutionOutcome::ApprovalOnly { tx_hashes };
        };

        match self.poll_lifecycle(&order_tx_hash, chain_id).await {
            Some(report) => match report.status {
                LifecycleStatus::Filled => {
                    info!(tx_hash = %order_tx_hash, "GMX order filled");
                    ExecutionOutcome::Confirmed {
                        tx_hashes,
                        order_tx_hash,
                    }
                }
                LifecycleStatus::Cancelled => ExecutionOutcome::Failed {
                    tx_hashes,
                    error: format!(
                        "GMX order cancelled: {}",
                        report.reason.as_deref().unwrap_or("no reason given")
                    ),
                },
                LifecycleStatus::Failed | LifecycleStatus::Pending => ExecutionOutcome::Failed {
                    tx_hashes,
                    error: format!(
                        "GMX order failed: {}",
                        report.reason.as_deref().unwrap_or("no reason given")
                    ),
                },
            },
            None => {
                warn!(
                    tx_hash = %order_tx_hash,
                    attempts = self.lifecycle.max_attempts,
                    "GMX order lifecycle not terminal after polling"
                );
                ExecutionOutcome::Unresolved {
                    tx_hashes,
                    order_tx_hash,
                }
            }
        }
    }

    /// Poll until terminal or the attempt budget runs out.
    async fn poll_lifecycle(&self, tx_hash: &str, chain_id: u64) -> Option<LifecycleReport> {
        let query = LifecycleQuery {
            provider_name: self.provider_name.clone(),
            chain_id,
            tx_hash: tx_hash.to_string(),
            wallet_address: self.wallet_address.clone(),
        };

        for attempt in 1..=self.lifecycle.max_attempts {
            match self.client.get_perpetual_lifecycle(&query).await {
                Ok(report) if report.status.is_terminal() => return Some(report),
                Ok(report) => debug!(tx_hash, attempt, status = ?report.status, "Lifecycle pending"),
                Err(e) => warn!(tx_hash, attempt, error = %e, "Lifecycle poll failed"),
            }
            if attempt < self.lifecycle.max_attempts {
                tokio::time::sleep(self.lifecycle.interval).await;
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
