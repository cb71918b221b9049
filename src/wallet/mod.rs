//! Wallet seam: signs and sends planned transactions, then waits for receipts.

pub mod evm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::onchain::PlannedTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("transaction send failed: {0}")]
    Send(String),

    #[error("receipt for {tx_hash} unavailable: {cause}")]
    Receipt { tx_hash: String, cause: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Sign and broadcast. Returns the transaction hash.
    async fn send_transaction(&self, tx: &PlannedTransaction) -> Result<String, WalletError>;

    async fn wait_for_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, WalletError>;
}
