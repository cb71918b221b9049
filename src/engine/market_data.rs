//! Market data provider.
//!
//! Reads GMX markets and the wallet's positions, then resolves the single
//! target market for the configured index/collateral pair. Any failure here
//! halts the cycle.

use std::sync::Arc;
use tracing::{debug, info};

use crate::onchain::OnchainActions;
use crate::types::{AgentError, Market, Position};

/// Index/collateral symbols identifying the target market.
#[derive(Debug, Clone)]
pub struct MarketSelector {
    pub index_symbol: String,
    pub collateral_symbol: String,
}

impl MarketSelector {
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.index_symbol, self.collateral_symbol)
    }
}

/// Per-cycle read of market state.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub target: Market,
    /// Open positions on the target market, largest first.
    pub target_positions: Vec<Position>,
    /// Every open position the wallet holds.
    pub all_positions: Vec<Position>,
}

impl MarketView {
    /// The freshest position on the target market.
    pub fn primary_position(&self) -> Option<&Position> {
        self.target_positions
            .iter()
            .max_by_key(|p| (p.opened_at, p.size_in_usd))
    }
}

/// Resolve exactly one market matching `selector` on one of `chain_ids`.
pub fn resolve_target(
    markets: &[Market],
    selector: &MarketSelector,
    chain_ids: &[u64],
) -> Result<Market, AgentError> {
    let candidates: Vec<&Market> = markets
        .iter()
        .filter(|m| chain_ids.contains(&m.chain_id))
        .filter(|m| m.matches_pair(&selector.index_symbol, &selector.collateral_symbol))
        .collect();

    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(AgentError::NoMarketMatch {
            pair: selector.pair_label(),
            chains: chain_ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            candidates: candidates.len(),
        }),
    }
}

pub struct MarketDataProvider {
    client: Arc<dyn OnchainActions>,
    wallet_address: String,
    chain_ids: Vec<u64>,
    selector: MarketSelector,
}

impl MarketDataProvider {
    pub fn new(
        client: Arc<dyn OnchainActions>,
        wallet_address: &str,
        chain_ids: Vec<u64>,
        selector: MarketSelector,
    ) -> Self {
        Self {
            client,
            wallet_address: wallet_address.to_string(),
            chain_ids,
            selector,
        }
    }

    fn dependency_error(&self, cause: impl ToString) -> AgentError {
        AgentError::Dependency {
            endpoint: self.client.base_url().to_string(),
            cause: cause.to_string(),
        }
    }

    pub async fn load(&self) -> Result<MarketView, AgentError> {
        let markets = self
            .client
            .list_perpetual_markets(&self.chain_ids)
            .await
            .map_err(|e| self.dependency_error(e))?;
        let positions = self
            .client
            .list_perpetual_positions(&self.wallet_address, &self.chain_ids)
            .await
            .map_err(|e| self.dependency_error(e))?;

        debug!(markets = markets.len(), positions = positions.len(), "Market data fetched");

        let target = resolve_target(&markets, &self.selector, &self.chain_ids)?;

        let all_positions: Vec<Position> = positions.into_iter().filter(Position::is_open).collect();
        let mut target_positions: Vec<Position> = all_positions
            .iter()
            .filter(|p| p.is_on(&target))
            .cloned()
            .collect();
        target_positions.sort_by(|a, b| b.size_in_usd.cmp(&a.size_in_usd));

        info!(
            market = %target.market_address,
            pair = %target.pair_label(),
            target_positions = target_positions.len(),
            open_positions = all_positions.len(),
            "Target market resolved"
        );

        Ok(MarketView {
            target,
            target_positions,
            all_positions,
        })
    }
}
