//! Order sizing for opens.
//!
//! Notional starts at the configured order size, is raised to the minimum
//! order, then shrunk to fit the remaining exposure headroom. Leverage is
//! clamped to what the market allows.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::exposure::ExposureBasis;
use crate::types::Market;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    pub order_size_usd: Decimal,
    pub min_order_usd: Decimal,
    pub leverage: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            order_size_usd: dec!(50),
            min_order_usd: dec!(10),
            leverage: dec!(2),
        }
    }
}

/// A sized open order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub size_usd: Decimal,
    pub leverage: Decimal,
    pub collateral_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderSizer {
    config: SizingConfig,
}

impl OrderSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Size an open against `headroom`, measured in the same units as the
    /// exposure `basis`. `None` when less than the minimum order fits.
    pub fn size(&self, market: &Market, headroom: Decimal, basis: ExposureBasis) -> Option<SizedOrder> {
        let mut leverage = self.config.leverage.max(Decimal::ONE);
        if market.max_leverage >= Decimal::ONE {
            leverage = leverage.min(market.max_leverage);
        }

        // Collateral headroom allows `leverage` times as much notional.
        let max_notional = match basis {
            ExposureBasis::Notional => headroom,
            ExposureBasis::Collateral => headroom * leverage,
        };

        let min = self.config.min_order_usd;
        let size_usd = self.config.order_size_usd.max(min).min(max_notional).round_dp(2);
        if size_usd < min || size_usd <= Decimal::ZERO {
            return None;
        }
        let collateral_usd = (size_usd / leverage).round_dp(6);

        Some(SizedOrder {
            size_usd,
            leverage,
            collateral_usd,
        })
    }
}
