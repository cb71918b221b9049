//! Onchain-actions service abstraction.
//!
//! The service reads GMX markets and positions, builds unsigned transaction
//! plans for perpetual orders, and reports order lifecycle after submission.
//! The engine never signs anything here; signing goes through
//! [`crate::wallet::WalletClient`].

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Market, Position, Side};

/// ERC-20 `approve(address,uint256)` selector.
pub const APPROVE_SELECTOR: &str = "0x095ea7b3";

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Approval,
    Order,
}

/// Classify calldata as a token approval or an order transaction.
pub fn classify_calldata(data: &str) -> TxKind {
    let selector = data.get(..APPROVE_SELECTOR.len()).unwrap_or_default();
    if selector.eq_ignore_ascii_case(APPROVE_SELECTOR) {
        TxKind::Approval
    } else {
        TxKind::Order
    }
}

/// One unsigned transaction of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTransaction {
    pub to: String,
    pub data: String,
    /// Native value in wei, decimal string.
    pub value: String,
    pub chain_id: u64,
    pub kind: TxKind,
}

/// Ordered transactions to sign and send for one action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub transactions: Vec<PlannedTransaction>,
}

impl ExecutionPlan {
    pub fn order_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.kind == TxKind::Order)
            .count()
    }

    /// Non-empty and contains nothing but approvals.
    pub fn is_approval_only(&self) -> bool {
        !self.transactions.is_empty() && self.order_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Order requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenParams {
    pub wallet_address: String,
    pub chain_id: u64,
    pub market_address: String,
    pub collateral_token_address: String,
    pub pay_token_address: String,
    /// Collateral in raw token units.
    pub amount: String,
    pub leverage: Decimal,
    pub size_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
    pub wallet_address: String,
    pub chain_id: u64,
    pub market_address: String,
    pub position_side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceParams {
    pub wallet_address: String,
    pub chain_id: u64,
    pub market_address: String,
    pub position_side: Side,
    pub size_delta_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderRequest {
    Long(OpenParams),
    Short(OpenParams),
    Close(CloseParams),
    Reduce(ReduceParams),
}

impl OrderRequest {
    /// Path of the plan-building endpoint for this request.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            OrderRequest::Long(_) => "/perpetuals/long",
            OrderRequest::Short(_) => "/perpetuals/short",
            OrderRequest::Close(_) => "/perpetuals/close",
            OrderRequest::Reduce(_) => "/perpetuals/reduce",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OrderRequest::Long(_) | OrderRequest::Short(_))
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            OrderRequest::Long(p) | OrderRequest::Short(p) => p.chain_id,
            OrderRequest::Close(p) => p.chain_id,
            OrderRequest::Reduce(p) => p.chain_id,
        }
    }

    pub fn body(&self) -> serde_json::Value {
        let value = match self {
            OrderRequest::Long(p) | OrderRequest::Short(p) => serde_json::to_value(p),
            OrderRequest::Close(p) => serde_json::to_value(p),
            OrderRequest::Reduce(p) => serde_json::to_value(p),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRequest::Long(p) => write!(f, "open long ${} @ {}x", p.size_usd, p.leverage),
            OrderRequest::Short(p) => write!(f, "open short ${} @ {}x", p.size_usd, p.leverage),
            OrderRequest::Close(p) => write!(f, "close {}", p.position_side),
            OrderRequest::Reduce(p) => {
                write!(f, "reduce {} by ${}", p.position_side, p.size_delta_usd)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleQuery {
    pub provider_name: String,
    pub chain_id: u64,
    pub tx_hash: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

impl LifecycleStatus {
    /// Map a provider status string. Unknown statuses count as pending.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "filled" | "success" | "executed" => LifecycleStatus::Filled,
            "cancelled" | "canceled" => LifecycleStatus::Cancelled,
            "failed" | "reverted" => LifecycleStatus::Failed,
            _ => LifecycleStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub status: LifecycleStatus,
    pub reason: Option<String>,
    pub as_of: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnchainError {
    /// Transport failure or a non-success status that is not an order refusal.
    #[error("request to {endpoint} failed: {cause}")]
    Dependency { endpoint: String, cause: String },

    /// Plan construction refused the order (simulation failure).
    #[error("order rejected by {endpoint}: {message}")]
    OrderRejected { endpoint: String, message: String },

    #[error("invalid response from {endpoint}: {cause}")]
    InvalidResponse { endpoint: String, cause: String },
}

#[async_trait]
pub trait OnchainActions: Send + Sync {
    async fn list_perpetual_markets(&self, chain_ids: &[u64]) -> Result<Vec<Market>, OnchainError>;

    async fn list_perpetual_positions(
        &self,
        wallet_address: &str,
        chain_ids: &[u64],
    ) -> Result<Vec<Position>, OnchainError>;

    /// Build an unsigned plan for a long, short, close or reduce order.
    async fn create_perpetual_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExecutionPlan, OnchainError>;

    async fn get_perpetual_lifecycle(
        &self,
        query: &LifecycleQuery,
    ) -> Result<LifecycleReport, OnchainError>;

    /// Base URL, echoed in halt messages.
    fn base_url(&self) -> &str;
}
