//! Mock collaborators for integration testing.
//!
//! Deterministic, in-memory stand-ins for the Allora signal source, the
//! onchain-actions service and the signing wallet. Every response is
//! controllable from test code and every call is recorded.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gmx_allora_agent::engine::cycle::{CycleSettings, PollCycle};
use gmx_allora_agent::engine::executor::{ExecutionMode, ExecutionOrchestrator, LifecyclePolicy};
use gmx_allora_agent::engine::market_data::{MarketDataProvider, MarketSelector};
use gmx_allora_agent::onchain::{
    ExecutionPlan, LifecycleQuery, LifecycleReport, LifecycleStatus, OnchainActions,
    OnchainError, OrderRequest, PlannedTransaction, TxKind, APPROVE_SELECTOR,
};
use gmx_allora_agent::signal::{SignalError, SignalSource};
use gmx_allora_agent::strategy::exposure::{ExposureBasis, ExposureCalculator};
use gmx_allora_agent::strategy::sizing::{OrderSizer, SizingConfig};
use gmx_allora_agent::strategy::{DecisionConfig, DecisionEngine};
use gmx_allora_agent::types::{Market, Position, Side, Signal, TokenDescriptor};
use gmx_allora_agent::wallet::{ReceiptStatus, TransactionReceipt, WalletClient, WalletError};

pub const ONCHAIN_URL: &str = "http://mock-onchain:3050";
pub const WALLET: &str = "0x00000000000000000000000000000000000000a1";
pub const BTC_MARKET: &str = "0x47c031236e19d024b42f8AE6780E44A573170703";
pub const CHAIN_ID: u64 = 42161;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn token(symbol: &str, decimals: u32, address: &str) -> TokenDescriptor {
    TokenDescriptor {
        symbol: symbol.into(),
        decimals,
        address: address.into(),
    }
}

pub fn btc_usdc_market() -> Market {
    Market {
        chain_id: CHAIN_ID,
        market_address: BTC_MARKET.into(),
        index_token: token("BTC", 8, "0x47904963fc8b2340414262125aF798B9655E58Cd"),
        long_token: token("WBTC", 8, "0x2f2a2543B76A4166549F7aaB2e75Bef0aefC5B0f"),
        short_token: token("USDC", 6, "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        max_leverage: dec!(100),
    }
}

pub fn eth_usdc_market() -> Market {
    Market {
        chain_id: CHAIN_ID,
        market_address: "0x70d95587d40A2caf56bd97485aB3Eec10Bee6336".into(),
        index_token: token("ETH", 18, "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
        long_token: token("WETH", 18, "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
        short_token: token("USDC", 6, "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        max_leverage: dec!(100),
    }
}

pub fn position(market: &Market, side: Side, size_usd: Decimal) -> Position {
    Position {
        chain_id: market.chain_id,
        market_address: market.market_address.clone(),
        side,
        size_in_usd: size_usd,
        size_in_tokens: "0".into(),
        collateral_amount: size_usd / dec!(2),
        opened_at: Some(Utc::now()),
        closed_at: None,
        pending_fees_usd: Decimal::ZERO,
    }
}

/// A prediction with a symmetric confidence band around `value`.
pub fn prediction(value: Decimal) -> Signal {
    Signal {
        topic_id: 14,
        combined_value: value,
        confidence_interval: [
            value - dec!(1000),
            value - dec!(500),
            value,
            value + dec!(500),
            value + dec!(1000),
        ],
        fetched_at: Utc::now(),
    }
}

fn planned(data: &str, kind: TxKind) -> PlannedTransaction {
    PlannedTransaction {
        to: "0x69C527fC77291722b52649E45c838e41be8Bf5d5".into(),
        data: data.into(),
        value: "0".into(),
        chain_id: CHAIN_ID,
        kind,
    }
}

/// Approve plus order.
pub fn order_plan() -> ExecutionPlan {
    ExecutionPlan {
        transactions: vec![
            planned(&format!("{APPROVE_SELECTOR}00ff"), TxKind::Approval),
            planned("0xac9650d8deadbeef", TxKind::Order),
        ],
    }
}

pub fn approval_only_plan() -> ExecutionPlan {
    ExecutionPlan {
        transactions: vec![planned(&format!("{APPROVE_SELECTOR}00ff"), TxKind::Approval)],
    }
}

// ---------------------------------------------------------------------------
// Signal source
// ---------------------------------------------------------------------------

/// Replays queued fetch results in order. An empty queue is a transient
/// failure.
#[derive(Default)]
pub struct MockSignal {
    queue: Mutex<VecDeque<Result<Signal, SignalError>>>,
    fetches: AtomicUsize,
}

impl MockSignal {
    pub fn push(&self, result: Result<Signal, SignalError>) {
        self.queue.lock().unwrap().push_back(result);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalSource for MockSignal {
    async fn fetch(&self, _topic_id: u64) -> Result<Signal, SignalError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SignalError::Transient("queue exhausted".into())))
    }

    fn name(&self) -> &str {
        "mock-allora"
    }
}

// ---------------------------------------------------------------------------
// Onchain-actions service
// ---------------------------------------------------------------------------

/// In-memory onchain-actions service.
///
/// Plans are served from a queue; once it is empty `default_plan` is used.
pub struct MockOnchain {
    markets: Mutex<Vec<Market>>,
    positions: Mutex<Vec<Position>>,
    plans: Mutex<VecDeque<Result<ExecutionPlan, OnchainError>>>,
    default_plan: Mutex<ExecutionPlan>,
    lifecycle: Mutex<LifecycleStatus>,
    lifecycle_reason: Mutex<Option<String>>,
    /// If set, market and position reads fail with this cause.
    read_error: Mutex<Option<String>>,
    requests: Mutex<Vec<OrderRequest>>,
}

impl MockOnchain {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets: Mutex::new(markets),
            positions: Mutex::new(Vec::new()),
            plans: Mutex::new(VecDeque::new()),
            default_plan: Mutex::new(order_plan()),
            lifecycle: Mutex::new(LifecycleStatus::Filled),
            lifecycle_reason: Mutex::new(None),
            read_error: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn queue_plan(&self, plan: Result<ExecutionPlan, OnchainError>) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn set_lifecycle(&self, status: LifecycleStatus, reason: Option<&str>) {
        *self.lifecycle.lock().unwrap() = status;
        *self.lifecycle_reason.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn fail_reads(&self, cause: &str) {
        *self.read_error.lock().unwrap() = Some(cause.to_string());
    }

    pub fn requests(&self) -> Vec<OrderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn open_requests(&self) -> usize {
        self.requests().iter().filter(|r| r.is_open()).count()
    }

    fn check_reads(&self, path: &str) -> Result<(), OnchainError> {
        match self.read_error.lock().unwrap().clone() {
            Some(cause) => Err(OnchainError::Dependency {
                endpoint: format!("{ONCHAIN_URL}{path}"),
                cause,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OnchainActions for MockOnchain {
    async fn list_perpetual_markets(&self, chain_ids: &[u64]) -> Result<Vec<Market>, OnchainError> {
        self.check_reads("/perpetuals/markets")?;
        Ok(self
            .markets
            .lock()
            .unwrap()
            .iter()
            .filter(|m| chain_ids.contains(&m.chain_id))
            .cloned()
            .collect())
    }

    async fn list_perpetual_positions(
        &self,
        _wallet_address: &str,
        _chain_ids: &[u64],
    ) -> Result<Vec<Position>, OnchainError> {
        self.check_reads("/perpetuals/positions")?;
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn create_perpetual_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExecutionPlan, OnchainError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.plans.lock().unwrap().pop_front() {
            Some(plan) => plan,
            None => Ok(self.default_plan.lock().unwrap().clone()),
        }
    }

    async fn get_perpetual_lifecycle(
        &self,
        _query: &LifecycleQuery,
    ) -> Result<LifecycleReport, OnchainError> {
        Ok(LifecycleReport {
            status: *self.lifecycle.lock().unwrap(),
            reason: self.lifecycle_reason.lock().unwrap().clone(),
            as_of: Some(Utc::now()),
        })
    }

    fn base_url(&self) -> &str {
        ONCHAIN_URL
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// Signs nothing; hands out sequential hashes and successful receipts.
#[derive(Default)]
pub struct MockWallet {
    sent: Mutex<Vec<PlannedTransaction>>,
}

impl MockWallet {
    pub fn sent(&self) -> Vec<PlannedTransaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn send_transaction(&self, tx: &PlannedTransaction) -> Result<String, WalletError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx.clone());
        Ok(format!("0x{:064x}", sent.len()))
    }

    async fn wait_for_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, WalletError> {
        Ok(TransactionReceipt {
            transaction_hash: tx_hash.to_string(),
            status: ReceiptStatus::Success,
            block_number: Some(1),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A poll cycle wired to mock collaborators.
pub struct Harness {
    pub signal: Arc<MockSignal>,
    pub onchain: Arc<MockOnchain>,
    pub wallet: Arc<MockWallet>,
    pub cycle: PollCycle,
}

impl Harness {
    pub fn new(mode: ExecutionMode, markets: Vec<Market>) -> Self {
        Self::with_cap(mode, markets, dec!(500))
    }

    pub fn with_cap(mode: ExecutionMode, markets: Vec<Market>, exposure_cap_usd: Decimal) -> Self {
        Self::build(mode, markets, exposure_cap_usd, None)
    }

    pub fn with_max_hold(mode: ExecutionMode, markets: Vec<Market>, max_hold_secs: u64) -> Self {
        Self::build(mode, markets, dec!(500), Some(max_hold_secs))
    }

    fn build(
        mode: ExecutionMode,
        markets: Vec<Market>,
        exposure_cap_usd: Decimal,
        max_hold_secs: Option<u64>,
    ) -> Self {
        let signal = Arc::new(MockSignal::default());
        let onchain = Arc::new(MockOnchain::new(markets));
        let wallet = Arc::new(MockWallet::default());

        let market_data = MarketDataProvider::new(
            onchain.clone(),
            WALLET,
            vec![CHAIN_ID],
            MarketSelector {
                index_symbol: "BTC".into(),
                collateral_symbol: "USDC".into(),
            },
        );
        let engine = DecisionEngine::new(
            DecisionConfig {
                threshold_pct: Decimal::ZERO,
                exposure_cap_usd,
                max_position_usd: None,
                max_hold_secs,
            },
            ExposureCalculator::new(ExposureBasis::Notional),
            OrderSizer::new(SizingConfig::default()),
        );
        let executor = ExecutionOrchestrator::new(onchain.clone(), mode, "GMX", WALLET)
            .with_wallet(wallet.clone())
            .with_lifecycle_policy(LifecyclePolicy {
                interval: Duration::from_millis(1),
                max_attempts: 3,
            });

        let cycle = PollCycle::new(
            signal.clone(),
            market_data,
            engine,
            executor,
            CycleSettings {
                topic_id: 14,
                max_activity_events: 200,
            },
        );

        Self {
            signal,
            onchain,
            wallet,
            cycle,
        }
    }
}
