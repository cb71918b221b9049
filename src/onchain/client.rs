//! HTTP client for the onchain-actions service.
//!
//! All endpoints are JSON `POST`s under `{base}/perpetuals/…`. Amounts come
//! back as integer strings: USD values carry 30 decimals, collateral amounts
//! carry the collateral token's decimals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    classify_calldata, ExecutionPlan, LifecycleQuery, LifecycleReport, LifecycleStatus,
    OnchainActions, OnchainError, OrderRequest, PlannedTransaction,
};
use crate::types::{
    parse_decimal, parse_fixed_point, unix_to_datetime, Market, Position, Side,
    TokenDescriptor, USD_DECIMALS,
};

const DEFAULT_COLLATERAL_DECIMALS: u32 = 6;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Numbers arrive either as JSON numbers or as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Int(i64),
    Text(String),
}

impl WireNumber {
    fn as_i64(&self) -> Option<i64> {
        match self {
            WireNumber::Int(v) => Some(*v),
            WireNumber::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    fn as_text(&self) -> String {
        match self {
            WireNumber::Int(v) => v.to_string(),
            WireNumber::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireToken {
    symbol: String,
    #[serde(default)]
    decimals: Option<u32>,
    #[serde(default)]
    address: String,
}

impl From<WireToken> for TokenDescriptor {
    fn from(t: WireToken) -> Self {
        TokenDescriptor {
            symbol: t.symbol,
            decimals: t.decimals.unwrap_or(DEFAULT_COLLATERAL_DECIMALS),
            address: t.address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMarket {
    chain_id: WireNumber,
    market_address: String,
    index_token: WireToken,
    long_token: WireToken,
    short_token: WireToken,
    #[serde(default)]
    max_leverage: Option<WireNumber>,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<WireMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    chain_id: WireNumber,
    market_address: String,
    position_side: String,
    size_in_usd: String,
    #[serde(default)]
    size_in_tokens: String,
    #[serde(default)]
    collateral_amount: Option<String>,
    #[serde(default)]
    collateral_decimals: Option<u32>,
    #[serde(default)]
    increased_at_time: Option<WireNumber>,
    #[serde(default)]
    decreased_at_time: Option<WireNumber>,
    #[serde(default)]
    is_closed: bool,
    #[serde(default)]
    pending_funding_fees_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    positions: Vec<WirePosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    to: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    value: Option<WireNumber>,
    #[serde(default)]
    chain_id: Option<WireNumber>,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    transactions: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LifecycleResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    as_of: Option<WireNumber>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainQuery<'a> {
    chain_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet_address: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_market(m: WireMarket) -> Option<Market> {
    let chain_id = m.chain_id.as_u64()?;
    let max_leverage = m
        .max_leverage
        .as_ref()
        .and_then(|v| parse_decimal(&v.as_text()))
        .unwrap_or(Decimal::ONE);
    Some(Market {
        chain_id,
        market_address: m.market_address,
        index_token: m.index_token.into(),
        long_token: m.long_token.into(),
        short_token: m.short_token.into(),
        max_leverage,
    })
}

fn to_position(p: WirePosition) -> Option<Position> {
    let chain_id = p.chain_id.as_u64()?;
    let side: Side = p.position_side.parse().ok()?;
    let size_in_usd = parse_fixed_point(&p.size_in_usd, USD_DECIMALS)?;
    let collateral_decimals = p.collateral_decimals.unwrap_or(DEFAULT_COLLATERAL_DECIMALS);
    let collateral_amount = p
        .collateral_amount
        .as_deref()
        .and_then(|raw| parse_fixed_point(raw, collateral_decimals))
        .unwrap_or(Decimal::ZERO);
    let pending_fees_usd = p
        .pending_funding_fees_usd
        .as_deref()
        .and_then(|raw| parse_fixed_point(raw, USD_DECIMALS))
        .unwrap_or(Decimal::ZERO);
    let opened_at = p.increased_at_time.as_ref().and_then(|t| t.as_i64()).and_then(unix_to_datetime);
    let closed_at = if p.is_closed {
        p.decreased_at_time.as_ref().and_then(|t| t.as_i64()).and_then(unix_to_datetime)
    } else {
        None
    };

    Some(Position {
        chain_id,
        market_address: p.market_address,
        side,
        size_in_usd,
        size_in_tokens: p.size_in_tokens,
        collateral_amount,
        opened_at,
        closed_at,
        pending_fees_usd,
    })
}

fn to_plan(resp: PlanResponse, default_chain: u64) -> ExecutionPlan {
    let transactions = resp
        .transactions
        .into_iter()
        .map(|t| PlannedTransaction {
            kind: classify_calldata(&t.data),
            chain_id: t.chain_id.and_then(|c| c.as_u64()).unwrap_or(default_chain),
            value: t.value.map(|v| v.as_text()).unwrap_or_else(|| "0".into()),
            to: t.to,
            data: t.data,
        })
        .collect();
    ExecutionPlan { transactions }
}

/// Pull a human message out of an error body (`{"message": …}` or `{"error": …}`).
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "error", "reason"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OnchainActionsClient {
    http: Client,
    base_url: String,
}

impl OnchainActionsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("gmx-allora-agent/0.1.0")
            .build()
            .context("Failed to build HTTP client for onchain-actions")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body and decode the response. Non-success statuses map to
    /// `Dependency`.
    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, OnchainError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.post_with(path, body, dependency_status).await
    }

    /// POST with a caller-chosen mapping for non-success statuses.
    async fn post_with<B, T>(
        &self,
        path: &str,
        body: &B,
        on_status: fn(String, StatusCode, &str) -> OnchainError,
    ) -> Result<T, OnchainError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let endpoint = self.url(path);
        debug!(endpoint = %endpoint, "onchain-actions request");

        let resp = self
            .http
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| OnchainError::Dependency {
                endpoint: endpoint.clone(),
                cause: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(on_status(endpoint, status, &error_message(&body)));
        }

        resp.json().await.map_err(|e| OnchainError::InvalidResponse {
            endpoint,
            cause: e.to_string(),
        })
    }
}

fn dependency_status(endpoint: String, status: StatusCode, message: &str) -> OnchainError {
    OnchainError::Dependency {
        endpoint,
        cause: format!("HTTP {status}: {message}"),
    }
}

/// Plan construction runs a simulation. Only 400 and 422 mean the order
/// itself was refused; rate limits, missing routes and 5xx stay dependency
/// failures.
fn plan_status(endpoint: String, status: StatusCode, message: &str) -> OnchainError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => OnchainError::OrderRejected {
            endpoint,
            message: format!("HTTP {status}: {message}"),
        },
        _ => dependency_status(endpoint, status, message),
    }
}

#[async_trait]
impl OnchainActions for OnchainActionsClient {
    async fn list_perpetual_markets(&self, chain_ids: &[u64]) -> Result<Vec<Market>, OnchainError> {
        let query = ChainQuery {
            chain_ids: chain_ids.iter().map(u64::to_string).collect(),
            wallet_address: None,
        };
        let resp: MarketsResponse = self.post("/perpetuals/markets", &query).await?;
        let total = resp.markets.len();
        let markets: Vec<Market> = resp.markets.into_iter().filter_map(to_market).collect();
        if markets.len() < total {
            warn!(skipped = total - markets.len(), "Skipped malformed GMX markets");
        }
        Ok(markets)
    }

    async fn list_perpetual_positions(
        &self,
        wallet_address: &str,
        chain_ids: &[u64],
    ) -> Result<Vec<Position>, OnchainError> {
        let query = ChainQuery {
            chain_ids: chain_ids.iter().map(u64::to_string).collect(),
            wallet_address: Some(wallet_address),
        };
        let resp: PositionsResponse = self.post("/perpetuals/positions", &query).await?;
        let total = resp.positions.len();
        let positions: Vec<Position> = resp.positions.into_iter().filter_map(to_position).collect();
        if positions.len() < total {
            warn!(skipped = total - positions.len(), "Skipped malformed GMX positions");
        }
        Ok(positions)
    }

    async fn create_perpetual_order(
        &self,
        request: &OrderRequest,
    ) -> Result<ExecutionPlan, OnchainError> {
        let path = request.endpoint_path();
        let resp: PlanResponse = self.post_with(path, &request.body(), plan_status).await?;
        Ok(to_plan(resp, request.chain_id()))
    }

    async fn get_perpetual_lifecycle(
        &self,
        query: &LifecycleQuery,
    ) -> Result<LifecycleReport, OnchainError> {
        let resp: LifecycleResponse = self.post("/perpetuals/lifecycle", query).await?;
        Ok(LifecycleReport {
            status: LifecycleStatus::parse(&resp.status),
            reason: resp.reason.filter(|r| !r.is_empty()),
            as_of: resp.as_of.and_then(|t| t.as_i64()).and_then(unix_to_datetime),
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
