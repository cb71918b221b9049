//! Local-key EVM wallet on alloy.
//!
//! The signing key never leaves the process: the provider signs with a
//! `PrivateKeySigner` and broadcasts raw transactions to `rpc_url`.

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{ReceiptStatus, TransactionReceipt, WalletClient, WalletError};
use crate::onchain::PlannedTransaction;

pub struct EvmWallet {
    provider: DynProvider,
    address: Address,
    receipt_timeout: Duration,
}

impl EvmWallet {
    pub fn new(rpc_url: &str, private_key: &SecretString, receipt_timeout: Duration) -> Result<Self> {
        let signer = parse_signer(private_key)?;
        let address = signer.address();
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid execution.rpc_url: {rpc_url}"))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            provider,
            address,
            receipt_timeout,
        })
    }

    /// Address derived from the signing key.
    pub fn address(&self) -> Address {
        self.address
    }
}

fn parse_signer(private_key: &SecretString) -> Result<PrivateKeySigner> {
    let hex = private_key.expose_secret().trim().trim_start_matches("0x");
    PrivateKeySigner::from_str(hex).context("invalid private key")
}

/// Planned transaction → alloy request sent from `from`.
fn to_request(tx: &PlannedTransaction, from: Address) -> Result<TransactionRequest, WalletError> {
    let to = Address::from_str(tx.to.trim())
        .map_err(|e| WalletError::Send(format!("invalid tx target {}: {e}", tx.to)))?;
    let input = Bytes::from_str(tx.data.trim())
        .map_err(|e| WalletError::Send(format!("invalid tx calldata: {e}")))?;
    let value = match tx.value.trim() {
        "" => U256::ZERO,
        v => U256::from_str(v).map_err(|e| WalletError::Send(format!("invalid tx value {v}: {e}")))?,
    };

    Ok(TransactionRequest::default()
        .with_from(from)
        .with_to(to)
        .with_input(input)
        .with_value(value)
        .with_chain_id(tx.chain_id))
}

#[async_trait]
impl WalletClient for EvmWallet {
    async fn send_transaction(&self, tx: &PlannedTransaction) -> Result<String, WalletError> {
        let request = to_request(tx, self.address)?;
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| WalletError::Send(e.to_string()))?;

        let hash = pending.tx_hash().to_string();
        info!(tx_hash = %hash, to = %tx.to, kind = ?tx.kind, chain_id = tx.chain_id, "Transaction sent");
        Ok(hash)
    }

    async fn wait_for_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, WalletError> {
        let receipt_error = |cause: String| WalletError::Receipt {
            tx_hash: tx_hash.to_string(),
            cause,
        };
        let hash = TxHash::from_str(tx_hash).map_err(|e| receipt_error(format!("invalid hash: {e}")))?;

        debug!(tx_hash, timeout_secs = self.receipt_timeout.as_secs(), "Awaiting receipt");
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), hash)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| receipt_error(e.to_string()))?;

        let status = if receipt.status() {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Reverted
        };
        Ok(TransactionReceipt {
            transaction_hash: receipt.transaction_hash.to_string(),
            status,
            block_number: receipt.block_number,
        })
    }
}
