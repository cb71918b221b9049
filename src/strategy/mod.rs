//! Decision engine: prediction vs. reference price → open, close, reduce or hold.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. Desired side from the predicted move against the previous reference
//!    price (beyond the configured threshold). No reference means no side.
//! 2. Flip: an assumed position whose side opposes the desired side is closed.
//! 3. Max hold: an assumed position held longer than the configured limit is
//!    closed.
//! 4. Retry: an open that only produced approvals last cycle is re-attempted
//!    unless the desired side now opposes it.
//! 5. Unchanged signal ⇒ hold.
//! 6. Assumed side already matches ⇒ hold, or reduce when over the per-position cap.
//! 7. Flat with a desired side ⇒ open, behind the exposure guard.

pub mod exposure;
pub mod sizing;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::types::{ActionKind, CycleMetrics, DecisionMetrics, Market, Position, Side, Signal};
use exposure::ExposureCalculator;
use sizing::{OrderSizer, SizedOrder};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why a cycle held. Kept structured so observers need not parse text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HoldReason {
    SignalUnchanged,
    ExposureLimit { exposure_usd: Decimal, cap_usd: Decimal },
    AlreadyPositioned { side: Side },
    NoDirectionalChange,
    NoReferencePrice,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldReason::SignalUnchanged => write!(f, "Signal unchanged since last cycle"),
            HoldReason::ExposureLimit {
                exposure_usd,
                cap_usd,
            } => write!(
                f,
                "Exposure limit reached: ${} of ${} cap in use",
                exposure_usd.round_dp(2),
                cap_usd.round_dp(2)
            ),
            HoldReason::AlreadyPositioned { side } => {
                write!(f, "Already positioned {side}; prediction agrees")
            }
            HoldReason::NoDirectionalChange => {
                write!(f, "Prediction within threshold of reference price")
            }
            HoldReason::NoReferencePrice => {
                write!(f, "No previous reference price; recording first prediction")
            }
        }
    }
}

/// Why an assumed position is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExitReason {
    /// The prediction now points the other way.
    SignalFlip { to: Side },
    /// The position outlived `max_hold_secs`.
    MaxHoldExceeded { held_secs: u64, max_secs: u64 },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::SignalFlip { to } => write!(f, "Prediction flipped to {to}"),
            ExitReason::MaxHoldExceeded { held_secs, max_secs } => {
                write!(f, "Position held {held_secs}s, past the {max_secs}s limit")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open { side: Side, order: SizedOrder },
    /// Close the position on `side`.
    Close { side: Side, exit: ExitReason },
    Reduce { side: Side, size_usd: Decimal },
    Hold(HoldReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub metrics: DecisionMetrics,
}

impl Decision {
    pub fn kind(&self) -> ActionKind {
        match self.action {
            Action::Open { .. } => ActionKind::Open,
            Action::Close { .. } => ActionKind::Close,
            Action::Reduce { .. } => ActionKind::Reduce,
            Action::Hold(_) => ActionKind::Hold,
        }
    }

    pub fn side(&self) -> Option<Side> {
        match &self.action {
            Action::Open { side, .. } | Action::Close { side, .. } | Action::Reduce { side, .. } => {
                Some(*side)
            }
            Action::Hold(_) => None,
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self.action, Action::Hold(_))
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        match &self.action {
            Action::Close { exit, .. } => Some(exit),
            _ => None,
        }
    }

    pub fn hold_reason(&self) -> Option<&HoldReason> {
        match &self.action {
            Action::Hold(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Action::Open { side, order } => write!(
                f,
                "OPEN {side} ${} @ {}x: {}",
                order.size_usd, order.leverage, self.reason
            ),
            Action::Close { side, .. } => write!(f, "CLOSE {side}: {}", self.reason),
            Action::Reduce { side, size_usd } => {
                write!(f, "REDUCE {side} by ${size_usd}: {}", self.reason)
            }
            Action::Hold(_) => write!(f, "HOLD: {}", self.reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Minimum relative move in percent. Zero means any strict move.
    pub threshold_pct: Decimal,
    pub exposure_cap_usd: Decimal,
    pub max_position_usd: Option<Decimal>,
    /// Close an assumed position once it has been open this long.
    pub max_hold_secs: Option<u64>,
}

/// Everything a decision looks at for one cycle.
pub struct DecisionInput<'a> {
    pub signal: &'a Signal,
    pub market: &'a Market,
    pub target_positions: &'a [Position],
    pub all_positions: &'a [Position],
    pub prior: &'a CycleMetrics,
    pub now: DateTime<Utc>,
}

pub struct DecisionEngine {
    config: DecisionConfig,
    exposure: ExposureCalculator,
    sizer: OrderSizer,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, exposure: ExposureCalculator, sizer: OrderSizer) -> Self {
        Self {
            config,
            exposure,
            sizer,
        }
    }

    /// Side implied by `predicted` against `previous`.
    pub fn desired_side(&self, predicted: Decimal, previous: Option<Decimal>) -> Option<Side> {
        let previous = previous?;
        let band = previous.abs() * self.config.threshold_pct / dec!(100);
        if predicted > previous + band {
            Some(Side::Long)
        } else if predicted < previous - band {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn decide(&self, input: &DecisionInput<'_>) -> Decision {
        let prior = input.prior;
        let predicted = input.signal.combined_value;
        let desired = self.desired_side(predicted, prior.previous_price);
        let exposure_usd = self.exposure.total(input.all_positions);
        let target_usd: Decimal = input
            .target_positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.size_in_usd)
            .sum();

        let metrics = DecisionMetrics {
            previous_price: prior.previous_price,
            price_delta_pct: prior
                .previous_price
                .filter(|p| !p.is_zero())
                .map(|p| ((predicted - p) / p * dec!(100)).round_dp(4)),
            exposure_usd,
            exposure_cap_usd: self.config.exposure_cap_usd,
            target_position_usd: target_usd,
        };

        debug!(
            predicted = %predicted,
            previous = ?prior.previous_price,
            desired = ?desired,
            assumed = ?prior.assumed_position_side,
            exposure = %exposure_usd,
            "Evaluating decision"
        );

        let decision = self.apply_rules(input, desired, target_usd, metrics);
        info!(action = %decision.kind(), side = ?decision.side(), reason = %decision.reason, "Decision");
        decision
    }

    fn apply_rules(
        &self,
        input: &DecisionInput<'_>,
        desired: Option<Side>,
        target_usd: Decimal,
        metrics: DecisionMetrics,
    ) -> Decision {
        let prior = input.prior;

        if let (Some(assumed), Some(want)) = (prior.assumed_position_side, desired) {
            if want == assumed.opposite() {
                let exit = ExitReason::SignalFlip { to: want };
                return Decision {
                    reason: format!("{exit}; closing {assumed} position"),
                    action: Action::Close { side: assumed, exit },
                    metrics,
                };
            }
        }

        if let Some((side, exit)) = self.max_hold_exit(input) {
            return Decision {
                reason: format!("{exit}; closing {side} position"),
                action: Action::Close { side, exit },
                metrics,
            };
        }

        if let Some(pending) = prior.pending_open {
            if prior.assumed_position_side.is_none() && desired != Some(pending.side.opposite()) {
                return self.open(
                    input,
                    pending.side,
                    format!(
                        "Retrying {} open after approval-only plan in cycle {}",
                        pending.side, pending.cycle
                    ),
                    metrics,
                );
            }
        }

        if prior.last_signal == Some(input.signal.fingerprint()) {
            return hold(HoldReason::SignalUnchanged, metrics);
        }

        match (prior.assumed_position_side, desired) {
            (Some(assumed), Some(_)) => match self.config.max_position_usd {
                Some(cap) if target_usd > cap => Decision {
                    action: Action::Reduce {
                        side: assumed,
                        size_usd: target_usd - cap,
                    },
                    reason: format!(
                        "{assumed} position ${} exceeds per-position cap ${}",
                        target_usd.round_dp(2),
                        cap.round_dp(2)
                    ),
                    metrics,
                },
                _ => hold(HoldReason::AlreadyPositioned { side: assumed }, metrics),
            },
            (Some(_), None) => hold(HoldReason::NoDirectionalChange, metrics),
            (None, Some(side)) => {
                let reason = format!(
                    "Prediction {} vs reference {}; opening {side}",
                    input.signal.combined_value.round_dp(2),
                    prior.previous_price.unwrap_or_default().round_dp(2),
                );
                self.open(input, side, reason, metrics)
            }
            (None, None) if prior.previous_price.is_none() => {
                hold(HoldReason::NoReferencePrice, metrics)
            }
            (None, None) => hold(HoldReason::NoDirectionalChange, metrics),
        }
    }

    /// Exit for an assumed position older than the hold limit.
    fn max_hold_exit(&self, input: &DecisionInput<'_>) -> Option<(Side, ExitReason)> {
        let max_secs = self.config.max_hold_secs?;
        let assumed = input.prior.assumed_position_side?;
        let opened_at = input
            .target_positions
            .iter()
            .filter(|p| p.is_open() && p.side == assumed)
            .filter_map(|p| p.opened_at)
            .min()?;
        let held_secs = u64::try_from((input.now - opened_at).num_seconds()).unwrap_or(0);
        (held_secs >= max_secs).then_some((assumed, ExitReason::MaxHoldExceeded { held_secs, max_secs }))
    }

    /// Open behind the exposure guard.
    fn open(
        &self,
        input: &DecisionInput<'_>,
        side: Side,
        reason: String,
        metrics: DecisionMetrics,
    ) -> Decision {
        let cap = self.config.exposure_cap_usd;
        let limit = HoldReason::ExposureLimit {
            exposure_usd: metrics.exposure_usd,
            cap_usd: cap,
        };
        if metrics.exposure_usd >= cap {
            return hold(limit, metrics);
        }

        let headroom = self.exposure.headroom(input.all_positions, cap);
        match self.sizer.size(input.market, headroom, self.exposure.basis()) {
            Some(order) => Decision {
                action: Action::Open { side, order },
                reason,
                metrics,
            },
            None => hold(limit, metrics),
        }
    }
}

fn hold(reason: HoldReason, metrics: DecisionMetrics) -> Decision {
    Decision {
        reason: reason.to_string(),
        action: Action::Hold(reason),
        metrics,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PendingOpen, TokenDescriptor};
    use chrono::Utc;
    use exposure::ExposureBasis;
    use sizing::SizingConfig;

    fn engine(cap: Decimal, max_position: Option<Decimal>) -> DecisionEngine {
        DecisionEngine::new(
            DecisionConfig {
                threshold_pct: Decimal::ZERO,
                exposure_cap_usd: cap,
                max_position_usd: max_position,
                max_hold_secs: None,
            },
            ExposureCalculator::new(ExposureBasis::Notional),
            OrderSizer::new(SizingConfig::default()),
        )
    }

    fn market() -> Market {
        let token = |s: &str| TokenDescriptor {
            symbol: s.into(),
            decimals: 6,
            address: format!("0x{s}"),
        };
        Market {
            chain_id: 42161,
            market_address: "0xMarket".into(),
            index_token: token("BTC"),
            long_token: token("WBTC"),
            short_token: token("USDC"),
            max_leverage: dec!(50),
        }
    }

    fn signal(value: Decimal) -> Signal {
        Signal {
            topic_id: 14,
            combined_value: value,
            confidence_interval: [value - dec!(2), value - dec!(1), value, value + dec!(1), value + dec!(2)],
            fetched_at: Utc::now(),
        }
    }

    fn position(size: Decimal, side: Side) -> Position {
        Position {
            chain_id: 42161,
            market_address: "0xMarket".into(),
            side,
            size_in_usd: size,
            size_in_tokens: "0".into(),
            collateral_amount: size / dec!(2),
            opened_at: None,
            closed_at: None,
            pending_fees_usd: Decimal::ZERO,
        }
    }

    fn prior(previous: Option<Decimal>, assumed: Option<Side>) -> CycleMetrics {
        CycleMetrics {
            previous_price: previous,
            assumed_position_side: assumed,
            ..CycleMetrics::default()
        }
    }

    fn decide(engine: &DecisionEngine, sig: &Signal, positions: &[Position], prior: &CycleMetrics) -> Decision {
        let m = market();
        engine.decide(&DecisionInput {
            signal: sig,
            market: &m,
            target_positions: positions,
            all_positions: positions,
            prior,
            now: Utc::now(),
        })
    }

    #[test]
    fn test_desired_side_with_threshold() {
        let mut e = engine(dec!(500), None);
        assert_eq!(e.desired_side(dec!(101), Some(dec!(100))), Some(Side::Long));
        assert_eq!(e.desired_side(dec!(99), Some(dec!(100))), Some(Side::Short));
        assert_eq!(e.desired_side(dec!(100), Some(dec!(100))), None);
        assert_eq!(e.desired_side(dec!(101), None), None);

        e.config.threshold_pct = dec!(2);
        assert_eq!(e.desired_side(dec!(101), Some(dec!(100))), None);
        assert_eq!(e.desired_side(dec!(103), Some(dec!(100))), Some(Side::Long));
    }

    #[test]
    fn test_first_cycle_holds_without_reference() {
        let d = decide(&engine(dec!(500), None), &signal(dec!(47000)), &[], &prior(None, None));
        assert_eq!(d.hold_reason(), Some(&HoldReason::NoReferencePrice));
    }

    #[test]
    fn test_opens_long_when_flat() {
        let d = decide(&engine(dec!(500), None), &signal(dec!(48000)), &[], &prior(Some(dec!(47000)), None));
        match d.action {
            Action::Open { side, order } => {
                assert_eq!(side, Side::Long);
                assert_eq!(order.size_usd, dec!(50));
            }
            other => panic!("expected open, got {other:?}"),
        }
        assert_eq!(d.metrics.price_delta_pct, Some(dec!(2.1277)));
    }

    #[test]
    fn test_flip_takes_precedence_over_unchanged_signal() {
        let sig = signal(dec!(46000));
        let mut p = prior(Some(dec!(47000)), Some(Side::Long));
        p.last_signal = Some(sig.fingerprint());
        let d = decide(&engine(dec!(500), None), &sig, &[position(dec!(50), Side::Long)], &p);
        assert_eq!(
            d.action,
            Action::Close {
                side: Side::Long,
                exit: ExitReason::SignalFlip { to: Side::Short },
            }
        );
    }

    #[test]
    fn test_unchanged_signal_holds() {
        let sig = signal(dec!(48000));
        let mut p = prior(Some(dec!(47000)), None);
        p.last_signal = Some(sig.fingerprint());
        let d = decide(&engine(dec!(500), None), &sig, &[], &p);
        assert_eq!(d.hold_reason(), Some(&HoldReason::SignalUnchanged));
    }

    #[test]
    fn test_retry_pending_open_ignores_unchanged_signal() {
        let sig = signal(dec!(48000));
        let mut p = prior(Some(dec!(48000)), None);
        p.last_signal = Some(sig.fingerprint());
        p.pending_open = Some(PendingOpen { side: Side::Short, cycle: 3 });
        let d = decide(&engine(dec!(500), None), &sig, &[], &p);
        assert!(matches!(d.action, Action::Open { side: Side::Short, .. }));
        assert!(d.reason.contains("Retrying"));
    }

    #[test]
    fn test_retry_dropped_when_prediction_opposes() {
        let mut p = prior(Some(dec!(47000)), None);
        p.pending_open = Some(PendingOpen { side: Side::Short, cycle: 3 });
        let d = decide(&engine(dec!(500), None), &signal(dec!(48000)), &[], &p);
        assert!(matches!(d.action, Action::Open { side: Side::Long, .. }));
    }

    #[test]
    fn test_exposure_guard_blocks_open() {
        let others = vec![position(dec!(500), Side::Short)];
        let d = decide(&engine(dec!(500), None), &signal(dec!(48000)), &others, &prior(Some(dec!(47000)), None));
        assert!(matches!(d.action, Action::Hold(HoldReason::ExposureLimit { .. })));
        assert!(d.reason.contains("Exposure limit"));
    }

    #[test]
    fn test_already_positioned_holds_or_reduces() {
        let positions = vec![position(dec!(300), Side::Long)];
        let p = prior(Some(dec!(47000)), Some(Side::Long));

        let d = decide(&engine(dec!(1000), None), &signal(dec!(48000)), &positions, &p);
        assert_eq!(d.hold_reason(), Some(&HoldReason::AlreadyPositioned { side: Side::Long }));

        let d = decide(&engine(dec!(1000), Some(dec!(250))), &signal(dec!(48000)), &positions, &p);
        assert_eq!(d.action, Action::Reduce { side: Side::Long, size_usd: dec!(50) });
        assert_eq!(d.kind(), ActionKind::Reduce);
    }

    #[test]
    fn test_hold_reason_serializes_tagged() {
        let json = serde_json::to_value(HoldReason::AlreadyPositioned { side: Side::Short }).unwrap();
        assert_eq!(json["kind"], "already-positioned");
        assert_eq!(json["side"], "short");
    }

    #[test]
    fn test_max_hold_closes_aged_position() {
        let mut e = engine(dec!(1000), None);
        e.config.max_hold_secs = Some(8 * 3600);
        let mut aged = position(dec!(100), Side::Long);
        aged.opened_at = Some(Utc::now() - chrono::Duration::hours(9));
        let p = prior(Some(dec!(47000)), Some(Side::Long));

        let d = decide(&e, &signal(dec!(48000)), &[aged.clone()], &p);
        match &d.action {
            Action::Close {
                side,
                exit: ExitReason::MaxHoldExceeded { held_secs, max_secs },
            } => {
                assert_eq!(*side, Side::Long);
                assert!(*held_secs >= 9 * 3600);
                assert_eq!(*max_secs, 8 * 3600);
            }
            other => panic!("expected max-hold close, got {other:?}"),
        }

        aged.opened_at = Some(Utc::now() - chrono::Duration::hours(1));
        let d = decide(&e, &signal(dec!(48000)), &[aged], &p);
        assert_eq!(d.hold_reason(), Some(&HoldReason::AlreadyPositioned { side: Side::Long }));
    }

    #[test]
    fn test_exit_reason_serializes_tagged() {
        let json = serde_json::to_value(ExitReason::MaxHoldExceeded {
            held_secs: 90,
            max_secs: 60,
        })
        .unwrap();
        assert_eq!(json["kind"], "max-hold-exceeded");
        assert_eq!(json["held_secs"], 90);
        assert_eq!(json["max_secs"], 60);
    }

    #[test]
    fn test_max_hold_ignored_when_flat() {
        let mut e = engine(dec!(1000), None);
        e.config.max_hold_secs = Some(60);
        let mut stale = position(dec!(100), Side::Short);
        stale.opened_at = Some(Utc::now() - chrono::Duration::hours(2));

        // Untracked position, no assumed side: the open path is unaffected.
        let d = decide(&e, &signal(dec!(48000)), &[stale], &prior(Some(dec!(47000)), None));
        assert!(matches!(d.action, Action::Open { side: Side::Long, .. }));
    }

    #[test]
    fn test_collateral_basis_sizes_against_collateral_room() {
        let e = DecisionEngine::new(
            DecisionConfig {
                threshold_pct: Decimal::ZERO,
                exposure_cap_usd: dec!(100),
                max_position_usd: None,
                max_hold_secs: None,
            },
            ExposureCalculator::new(ExposureBasis::Collateral),
            OrderSizer::new(SizingConfig::default()),
        );
        // $160 notional at 2x posts $80 collateral, leaving $20 of room.
        let others = vec![position(dec!(160), Side::Short)];
        let d = decide(&e, &signal(dec!(48000)), &others, &prior(Some(dec!(47000)), None));
        match d.action {
            Action::Open { order, .. } => {
                assert_eq!(order.size_usd, dec!(40));
                assert_eq!(order.collateral_usd, dec!(20));
            }
            other => panic!("expected open, got {other:?}"),
        }
    }
}
