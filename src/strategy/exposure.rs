//! Exposure calculator.
//!
//! Sums the wallet's USD exposure over every open position, not only the
//! target market, so the cap applies to the whole account.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::Position;

/// What counts as exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureBasis {
    /// Position notional (`size_in_usd`).
    #[default]
    Notional,
    /// Posted collateral, valued 1:1 in USD (stablecoin collateral).
    Collateral,
}

#[derive(Debug, Clone, Copy)]
pub struct ExposureCalculator {
    basis: ExposureBasis,
}

impl ExposureCalculator {
    pub fn new(basis: ExposureBasis) -> Self {
        Self { basis }
    }

    pub fn basis(&self) -> ExposureBasis {
        self.basis
    }

    /// Total USD exposure across all open positions.
    pub fn total(&self, positions: &[Position]) -> Decimal {
        positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| match self.basis {
                ExposureBasis::Notional => p.size_in_usd,
                ExposureBasis::Collateral => p.collateral_amount,
            })
            .sum()
    }

    /// Remaining room under `cap`, never negative.
    pub fn headroom(&self, positions: &[Position], cap: Decimal) -> Decimal {
        (cap - self.total(positions)).max(Decimal::ZERO)
    }
}
