//! Shared types for the GMX/Allora agent.
//!
//! These types form the data model used across all modules: the
//! transient per-cycle reads (signal, markets, positions), the persisted
//! cross-cycle state (metrics, transaction history, activity log), and
//! the domain error taxonomy that decides between halts and recoverable
//! conditions.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Fractional digits kept when parsing wire decimals. Anything beyond this is
/// truncated so that long normalized values still fit in a `Decimal`.
const MAX_FRACTION_DIGITS: usize = 18;

/// GMX expresses USD amounts with 30 decimals.
pub const USD_DECIMALS: u32 = 30;

/// Parse a plain decimal string ("97234.12", "-0.5") into a `Decimal`,
/// truncating excess fractional digits. Returns `None` for anything that is
/// not a plain base-10 number.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
    let sign = if negative { "-" } else { "" };
    let text = if frac.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac}")
    };
    Decimal::from_str(&text).ok()
}

/// Parse an integer fixed-point string (e.g. a 30-decimal GMX USD amount or
/// raw token units) into a `Decimal` scaled down by `decimals`.
pub fn parse_fixed_point(raw: &str, decimals: u32) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if decimals == 0 {
        return parse_decimal(trimmed);
    }

    let width = decimals as usize + 1;
    let padded = format!("{:0>width$}", digits, width = width);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals as usize);
    let sign = if negative { "-" } else { "" };
    parse_decimal(&format!("{sign}{int_part}.{frac_part}"))
}

/// Convert a human amount into raw integer token units (`amount × 10^decimals`,
/// truncated). Returns `None` when the factor or the product exceeds what a
/// `Decimal` can hold (above 28 decimals, or a large amount near it).
pub fn to_raw_units(amount: Decimal, decimals: u32) -> Option<String> {
    let factor = 10i128.checked_pow(decimals)?;
    let scaled = amount.checked_mul(Decimal::try_from_i128_with_scale(factor, 0).ok()?)?;
    Some(scaled.trunc().normalize().to_string())
}

/// Convert unix seconds to a UTC timestamp. Zero means "unset" on the wire.
pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A directional price prediction for one topic, fetched once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub topic_id: u64,
    /// Combined (network) predicted value.
    pub combined_value: Decimal,
    /// Confidence interval, low → high.
    pub confidence_interval: [Decimal; 5],
    pub fetched_at: DateTime<Utc>,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic {} → {} (CI {} .. {})",
            self.topic_id,
            self.combined_value.round_dp(4),
            self.confidence_interval[0].round_dp(4),
            self.confidence_interval[4].round_dp(4),
        )
    }
}

impl Signal {
    /// The value-only identity of this signal, used to detect unchanged input.
    pub fn fingerprint(&self) -> SignalFingerprint {
        SignalFingerprint {
            combined_value: self.combined_value,
            confidence_interval: self.confidence_interval,
        }
    }

    /// Width of the full confidence band (high − low).
    pub fn band_width(&self) -> Decimal {
        self.confidence_interval[4] - self.confidence_interval[0]
    }
}

/// Signal values without the fetch timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFingerprint {
    pub combined_value: Decimal,
    pub confidence_interval: [Decimal; 5],
}

// ---------------------------------------------------------------------------
// Markets & positions
// ---------------------------------------------------------------------------

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            _ => Err(anyhow::anyhow!("Unknown position side: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub decimals: u32,
    pub address: String,
}

/// A tradeable perpetual market. Read-only reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub chain_id: u64,
    pub market_address: String,
    pub index_token: TokenDescriptor,
    pub long_token: TokenDescriptor,
    pub short_token: TokenDescriptor,
    pub max_leverage: Decimal,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}-{}] on {} ({}) max {}x",
            self.pair_label(),
            self.long_token.symbol,
            self.short_token.symbol,
            self.chain_id,
            self.market_address,
            self.max_leverage,
        )
    }
}

impl Market {
    /// "INDEX/SHORT", e.g. "BTC/USDC".
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.index_token.symbol, self.short_token.symbol)
    }

    /// Whether this market trades `index` against `collateral` (case-insensitive).
    pub fn matches_pair(&self, index: &str, collateral: &str) -> bool {
        self.index_token.symbol.eq_ignore_ascii_case(index)
            && self.short_token.symbol.eq_ignore_ascii_case(collateral)
    }
}

/// An open perpetual position held by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub chain_id: u64,
    pub market_address: String,
    pub side: Side,
    /// Notional size in USD (parsed from the 30-decimal wire value).
    pub size_in_usd: Decimal,
    /// Size in index tokens, kept as the raw wire string.
    pub size_in_tokens: String,
    /// Collateral in collateral-token units.
    pub collateral_amount: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pending_fees_usd: Decimal,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ${:.2} (collateral {:.2}, {:.2}x) on {}",
            self.side,
            self.market_address,
            self.size_in_usd,
            self.collateral_amount,
            self.leverage(),
            self.chain_id,
        )
    }
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none() && self.size_in_usd > Decimal::ZERO
    }

    /// Effective leverage (size / collateral). Zero when collateral is empty.
    pub fn leverage(&self) -> Decimal {
        if self.collateral_amount > Decimal::ZERO {
            self.size_in_usd / self.collateral_amount
        } else {
            Decimal::ZERO
        }
    }

    pub fn is_on(&self, market: &Market) -> bool {
        self.chain_id == market.chain_id
            && self.market_address.eq_ignore_ascii_case(&market.market_address)
    }
}

// ---------------------------------------------------------------------------
// Cycle metrics (persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenValue {
    pub symbol: String,
    pub usd: Decimal,
}

/// Valuation of the target position as of the latest cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub total_usd: Decimal,
    pub leverage: Decimal,
    pub side: Option<Side>,
    pub token_values: Vec<TokenValue>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PositionSnapshot {
    /// Snapshot of a live position on `market`.
    pub fn of(position: &Position, market: &Market, at: DateTime<Utc>) -> Self {
        Self {
            total_usd: position.size_in_usd,
            leverage: position.leverage(),
            side: Some(position.side),
            token_values: vec![
                TokenValue {
                    symbol: market.index_token.symbol.clone(),
                    usd: position.size_in_usd,
                },
                TokenValue {
                    symbol: market.short_token.symbol.clone(),
                    usd: position.collateral_amount,
                },
            ],
            updated_at: Some(at),
        }
    }

    /// Zeroed valuation, used when no matching position exists.
    pub fn flat(at: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(at),
            ..Self::default()
        }
    }
}

/// Coarse action label persisted in summaries and transaction history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Open,
    Close,
    Reduce,
    Hold,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Open => write!(f, "open"),
            ActionKind::Close => write!(f, "close"),
            ActionKind::Reduce => write!(f, "reduce"),
            ActionKind::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEcho {
    pub topic_id: u64,
    pub combined_value: Decimal,
    pub confidence_interval: [Decimal; 5],
}

impl From<&Signal> for PredictionEcho {
    fn from(signal: &Signal) -> Self {
        Self {
            topic_id: signal.topic_id,
            combined_value: signal.combined_value,
            confidence_interval: signal.confidence_interval,
        }
    }
}

/// Numbers the decision engine looked at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionMetrics {
    pub previous_price: Option<Decimal>,
    /// Percentage move of the prediction against the previous reference.
    pub price_delta_pct: Option<Decimal>,
    pub exposure_usd: Decimal,
    pub exposure_cap_usd: Decimal,
    pub target_position_usd: Decimal,
}

/// What the latest decided cycle did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub action: ActionKind,
    pub side: Option<Side>,
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub reason: String,
    pub prediction: PredictionEcho,
    pub metrics: DecisionMetrics,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: Option<String>,
    /// The submitted plan contained token approvals but no order.
    #[serde(default)]
    pub approval_only: bool,
}

/// An open that has to be re-attempted because its plan only approved tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOpen {
    pub side: Side,
    pub cycle: u64,
}

/// Cross-cycle metrics. A cycle receives the prior value and returns a new one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub iteration: u64,
    pub cycles_since_rebalance: u64,
    /// Consecutive cycles without a fresh signal.
    pub stale_cycles: u64,
    /// Only changes on a successfully decided open/close.
    pub assumed_position_side: Option<Side>,
    pub previous_price: Option<Decimal>,
    pub last_signal: Option<SignalFingerprint>,
    pub pending_open: Option<PendingOpen>,
    pub latest_snapshot: PositionSnapshot,
    pub latest_cycle: Option<CycleSummary>,
}

// ---------------------------------------------------------------------------
// Transactions & task status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
}

/// One entry of the append-only transaction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub cycle: u64,
    pub action: ActionKind,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {:?} {} ({})",
            self.cycle,
            self.action,
            self.status,
            self.tx_hash.as_deref().unwrap_or("-"),
            self.reason,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: Option<String>,
}

impl TaskStatus {
    pub fn working() -> Self {
        Self {
            state: TaskState::Working,
            message: None,
        }
    }

    pub fn with_message(state: TaskState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactPart {
    Text { text: String },
    Data { data: serde_json::Value },
}

/// Closed set of events the engine emits for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActivityEvent {
    Status {
        message: String,
        level: StatusLevel,
    },
    #[serde(rename_all = "camelCase")]
    Artifact {
        artifact_id: String,
        parts: Vec<ArtifactPart>,
    },
    DispatchResponse {
        parts: Vec<ArtifactPart>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub cycle: u64,
    pub emitted_at: DateTime<Utc>,
    pub event: ActivityEvent,
}

/// Append-only activity log in emission order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityLog {
    records: Vec<ActivityRecord>,
}

impl ActivityLog {
    /// Append records, keeping at most `retain` of the newest.
    pub fn extend(&mut self, records: Vec<ActivityRecord>, retain: usize) {
        self.records.extend(records);
        let excess = self.records.len().saturating_sub(retain.max(1));
        if excess > 0 {
            self.records.drain(..excess);
        }
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<&ActivityRecord> {
        self.records.iter().rev().take(limit).collect()
    }

    pub fn latest_status(&self) -> Option<(&str, StatusLevel)> {
        self.records.iter().rev().find_map(|r| match &r.event {
            ActivityEvent::Status { message, level } => Some((message.as_str(), *level)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

/// Persistent agent state, saved to disk after each cycle.
///
/// `halt_reason` and `execution_error` distinguish "never set" (`None`)
/// from "explicitly cleared" (`Some("")`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub metrics: CycleMetrics,
    pub task: TaskStatus,
    pub halt_reason: Option<String>,
    pub execution_error: Option<String>,
    pub transactions: Vec<TransactionRecord>,
    pub activity: ActivityLog,
    pub start_time: DateTime<Utc>,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | iteration={} | side={} | prev={} | stale={} | txs={}",
            self.task.state,
            self.metrics.iteration,
            self.metrics
                .assumed_position_side
                .map(|s| s.to_string())
                .unwrap_or_else(|| "flat".into()),
            self.metrics
                .previous_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
            self.metrics.stale_cycles,
            self.transactions.len(),
        )
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            metrics: CycleMetrics::default(),
            task: TaskStatus::working(),
            halt_reason: None,
            execution_error: None,
            transactions: Vec::new(),
            activity: ActivityLog::default(),
            start_time: Utc::now(),
        }
    }

    /// Halted with a non-empty reason.
    pub fn is_halted(&self) -> bool {
        self.halt_reason.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Cycles do not run while halted or awaiting external input.
    pub fn is_blocked(&self) -> bool {
        self.is_halted() || self.task.state == TaskState::InputRequired
    }

    /// Clear a halt or input-required blocker after operator action.
    pub fn resume(&mut self) {
        self.halt_reason = None;
        self.task = TaskStatus::working();
    }

    /// Uptime duration since agent start.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Conditions that halt a cycle before a decision is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to fetch GMX markets/positions from {endpoint}: {cause}")]
    Dependency { endpoint: String, cause: String },

    #[error("No GMX {pair} market resolved on chain(s) {chains} ({candidates} candidates)")]
    NoMarketMatch {
        pair: String,
        chains: String,
        candidates: usize,
    },

    #[error("Allora prediction rejected: {0}")]
    SignalRejected(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
