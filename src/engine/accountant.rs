//! Accountant: derives the next `CycleMetrics` from the prior value and what
//! happened this cycle, and builds transaction history entries.
//!
//! Every function here is pure. The prior metrics are borrowed and a new
//! value is returned for the caller to persist.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::engine::executor::ExecutionReport;
use crate::engine::market_data::MarketView;
use crate::strategy::{Action, Decision};
use crate::types::{
    ActionKind, CycleMetrics, CycleSummary, PendingOpen, PositionSnapshot, PredictionEcho, Signal,
    TaskState, TransactionRecord,
};

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleOutcome {
    /// Skipped because the agent is halted or awaiting input.
    Blocked,
    /// No fresh signal; prior state carried forward.
    Stale,
    /// Stopped before deciding.
    Halted,
    /// A decision was made (and executed unless it was a hold).
    Decided,
}

/// Summary of one poll cycle, for logs.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub outcome: CycleOutcome,
    pub action: Option<ActionKind>,
    pub reason: Option<String>,
    pub tx_hashes: Vec<String>,
    pub task_state: TaskState,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn new(cycle_number: u64, outcome: CycleOutcome, task_state: TaskState) -> Self {
        Self {
            cycle_number,
            outcome,
            action: None,
            reason: None,
            tx_hashes: Vec::new(),
            task_state,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Signal unavailable: count the stale cycle and keep everything else.
    pub fn stale(prior: &CycleMetrics) -> CycleMetrics {
        CycleMetrics {
            iteration: prior.iteration + 1,
            cycles_since_rebalance: prior.cycles_since_rebalance + 1,
            stale_cycles: prior.stale_cycles + 1,
            ..prior.clone()
        }
    }

    /// Halted before a decision. A signal fetched this cycle still moves the
    /// reference price forward.
    pub fn halted(prior: &CycleMetrics, signal: Option<&Signal>) -> CycleMetrics {
        let mut next = CycleMetrics {
            iteration: prior.iteration + 1,
            cycles_since_rebalance: prior.cycles_since_rebalance + 1,
            ..prior.clone()
        };
        if let Some(signal) = signal {
            next.stale_cycles = 0;
            next.previous_price = Some(signal.combined_value);
            next.last_signal = Some(signal.fingerprint());
        }
        next
    }

    /// Valuation of the freshest target position, zeroed when there is none.
    pub fn snapshot(view: &MarketView, at: DateTime<Utc>) -> PositionSnapshot {
        match view.primary_position() {
            Some(position) => PositionSnapshot::of(position, &view.target, at),
            None => PositionSnapshot::flat(at),
        }
    }

    /// Metrics after a decided cycle.
    pub fn settle(
        prior: &CycleMetrics,
        signal: &Signal,
        view: &MarketView,
        decision: &Decision,
        execution: Option<&ExecutionReport>,
        at: DateTime<Utc>,
    ) -> CycleMetrics {
        let iteration = prior.iteration + 1;
        let acted = execution.is_some_and(|r| r.plan.is_some());
        let settled = execution.is_some_and(ExecutionReport::settled);
        let approval_only = execution.is_some_and(ExecutionReport::approval_only);

        let assumed_position_side = match (&decision.action, settled) {
            (Action::Open { side, .. }, true) => Some(*side),
            (Action::Close { .. }, true) => None,
            _ => prior.assumed_position_side,
        };

        // The retry marker lives for one cycle only.
        let pending_open = match &decision.action {
            Action::Open { side, .. } if approval_only => Some(PendingOpen {
                side: *side,
                cycle: iteration,
            }),
            _ => None,
        };

        let (size_usd, leverage) = match &decision.action {
            Action::Open { order, .. } => (order.size_usd, order.leverage),
            Action::Reduce { size_usd, .. } => (*size_usd, Decimal::ZERO),
            Action::Close { .. } => (decision.metrics.target_position_usd, Decimal::ZERO),
            Action::Hold(_) => (Decimal::ZERO, Decimal::ZERO),
        };

        let summary = CycleSummary {
            cycle: iteration,
            action: decision.kind(),
            side: decision.side(),
            size_usd,
            leverage,
            reason: decision.reason.clone(),
            prediction: PredictionEcho::from(signal),
            metrics: decision.metrics.clone(),
            timestamp: at,
            tx_hash: execution.and_then(|r| r.outcome.last_tx_hash()).map(str::to_string),
            approval_only,
        };

        let next = CycleMetrics {
            iteration,
            cycles_since_rebalance: if acted { 0 } else { prior.cycles_since_rebalance + 1 },
            stale_cycles: 0,
            assumed_position_side,
            previous_price: Some(signal.combined_value),
            last_signal: Some(signal.fingerprint()),
            pending_open,
            latest_snapshot: Self::snapshot(view, at),
            latest_cycle: Some(summary),
        };

        info!(
            cycle = iteration,
            action = %decision.kind(),
            assumed = ?next.assumed_position_side,
            since_rebalance = next.cycles_since_rebalance,
            snapshot_usd = %next.latest_snapshot.total_usd,
            "Cycle metrics settled"
        );

        next
    }

    /// History entry for an executed action. Simulations and rejected plans
    /// produce none.
    pub fn transaction_record(
        cycle: u64,
        decision: &Decision,
        execution: &ExecutionReport,
        at: DateTime<Utc>,
    ) -> Option<TransactionRecord> {
        let status = execution.outcome.tx_status()?;
        let reason = match execution.outcome.error() {
            Some(error) => error.to_string(),
            None if execution.approval_only() => format!("{} (approval only)", decision.reason),
            None => decision.reason.clone(),
        };
        Some(TransactionRecord {
            cycle,
            action: decision.kind(),
            tx_hash: execution.outcome.last_tx_hash().map(str::to_string),
            status,
            reason,
            timestamp: at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
