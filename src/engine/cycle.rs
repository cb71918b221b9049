//! One poll cycle: signal → market data → decision → execution → state.
//!
//! `PollCycle::run` borrows the prior `AgentState` and returns the next one
//! together with a report. Nothing is mutated in place, so the caller
//! decides when (and whether) to persist.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::engine::accountant::{Accountant, CycleOutcome, CycleReport};
use crate::engine::activity::{
    data_part, text_part, ActivityEmitter, EXECUTION_PLAN_ARTIFACT_ID,
    EXECUTION_RESULT_ARTIFACT_ID, TELEMETRY_ARTIFACT_ID,
};
use crate::engine::executor::{ExecutionOrchestrator, ExecutionOutcome, ExecutionReport};
use crate::engine::market_data::{MarketDataProvider, MarketView};
use crate::signal::{SignalError, SignalSource};
use crate::strategy::{Decision, DecisionEngine, DecisionInput};
use crate::types::{
    AgentError, AgentState, CycleMetrics, Signal, StatusLevel, TaskState, TaskStatus,
};

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub topic_id: u64,
    pub max_activity_events: usize,
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleUpdate {
    pub state: AgentState,
    pub report: CycleReport,
}

pub struct PollCycle {
    signal: Arc<dyn SignalSource>,
    market_data: MarketDataProvider,
    engine: DecisionEngine,
    executor: ExecutionOrchestrator,
    settings: CycleSettings,
}

impl PollCycle {
    pub fn new(
        signal: Arc<dyn SignalSource>,
        market_data: MarketDataProvider,
        engine: DecisionEngine,
        executor: ExecutionOrchestrator,
        settings: CycleSettings,
    ) -> Self {
        Self {
            signal,
            market_data,
            engine,
            executor,
            settings,
        }
    }

    pub async fn run(&self, prior: &AgentState) -> CycleUpdate {
        let cycle = prior.metrics.iteration + 1;
        let mut emitter = ActivityEmitter::new(cycle);
        let mut state = prior.clone();

        if prior.is_blocked() {
            let why = match prior.halt_reason.as_deref().filter(|r| !r.is_empty()) {
                Some(reason) => format!("halted: {reason}"),
                None => format!("task is {}", prior.task.state),
            };
            emitter.status(StatusLevel::Info, format!("Cycle skipped; agent {why}. Resume to continue."));
            let report = CycleReport::new(prior.metrics.iteration, CycleOutcome::Blocked, prior.task.state);
            return self.finish(state, emitter, report);
        }

        info!(cycle, source = self.signal.name(), topic_id = self.settings.topic_id, "Cycle started");

        let signal = match self.signal.fetch(self.settings.topic_id).await {
            Ok(signal) => signal,
            Err(SignalError::Transient(cause)) => {
                state.metrics = Accountant::stale(&prior.metrics);
                emitter.status(
                    StatusLevel::Warning,
                    format!(
                        "Allora prediction unavailable ({cause}); holding prior state, stale for {} cycle(s)",
                        state.metrics.stale_cycles
                    ),
                );
                let mut report = CycleReport::new(cycle, CycleOutcome::Stale, state.task.state);
                report.reason = Some(cause);
                return self.finish(state, emitter, report);
            }
            Err(SignalError::Rejected(cause)) => {
                let error = AgentError::SignalRejected(cause);
                return self.halt(state, emitter, cycle, Accountant::halted(&prior.metrics, None), error);
            }
        };

        let view = match self.market_data.load().await {
            Ok(view) => view,
            Err(error) => {
                let metrics = Accountant::halted(&prior.metrics, Some(&signal));
                return self.halt(state, emitter, cycle, metrics, error);
            }
        };

        let decision = self.engine.decide(&DecisionInput {
            signal: &signal,
            market: &view.target,
            target_positions: &view.target_positions,
            all_positions: &view.all_positions,
            prior: &prior.metrics,
            now: Utc::now(),
        });

        let execution = self.executor.execute(&decision, &view.target).await;
        let now = Utc::now();

        state.metrics = Accountant::settle(&prior.metrics, &signal, &view, &decision, execution.as_ref(), now);

        if let Some(report) = execution.as_ref() {
            if let Some(record) = Accountant::transaction_record(cycle, &decision, report, now) {
                state.transactions.push(record);
            }
            self.apply_execution(&mut state, report, &view);
        }

        self.emit_cycle_events(&mut emitter, &state.metrics, &signal, &decision, execution.as_ref());

        let mut report = CycleReport::new(cycle, CycleOutcome::Decided, state.task.state);
        report.action = Some(decision.kind());
        report.reason = Some(decision.reason.clone());
        report.tx_hashes = execution
            .as_ref()
            .map(|r| r.outcome.tx_hashes().to_vec())
            .unwrap_or_default();
        self.finish(state, emitter, report)
    }

    /// Task and error fields after an execution attempt.
    fn apply_execution(&self, state: &mut AgentState, report: &ExecutionReport, view: &MarketView) {
        match &report.outcome {
            ExecutionOutcome::ConstructionRejected { message } => {
                state.task = TaskStatus::with_message(TaskState::InputRequired, remediation(message, view));
                state.halt_reason = Some(String::new());
                state.execution_error = Some(String::new());
            }
            ExecutionOutcome::Failed { error, .. } => {
                state.task = TaskStatus::with_message(TaskState::Working, error.clone());
                state.execution_error = Some(error.clone());
            }
            ExecutionOutcome::Unresolved { order_tx_hash, .. } => {
                state.task = TaskStatus::with_message(
                    TaskState::Working,
                    format!("GMX order {order_tx_hash} still pending"),
                );
            }
            ExecutionOutcome::Simulated
            | ExecutionOutcome::Confirmed { .. }
            | ExecutionOutcome::ApprovalOnly { .. } => {
                state.task = TaskStatus::working();
                state.execution_error = None;
            }
        }
    }

    fn emit_cycle_events(
        &self,
        emitter: &mut ActivityEmitter,
        metrics: &CycleMetrics,
        signal: &Signal,
        decision: &Decision,
        execution: Option<&ExecutionReport>,
    ) {
        let telemetry = json!({
            "cycle": metrics.iteration,
            "action": decision.kind(),
            "side": decision.side(),
            "reason": decision.reason,
            "hold": decision.hold_reason(),
            "exit": decision.exit_reason(),
            "prediction": signal,
            "metrics": decision.metrics,
            "assumedPositionSide": metrics.assumed_position_side,
            "snapshot": metrics.latest_snapshot,
        });
        emitter.artifact(TELEMETRY_ARTIFACT_ID, vec![data_part(&telemetry)]);

        if let Some(report) = execution {
            if let Some(plan) = report.plan.as_ref() {
                if report.outcome == ExecutionOutcome::Simulated {
                    emitter.artifact(EXECUTION_PLAN_ARTIFACT_ID, vec![data_part(plan)]);
                }
            }
            emitter.artifact(EXECUTION_RESULT_ARTIFACT_ID, vec![data_part(&report.outcome.result())]);
        }

        let level = match execution.map(|r| &r.outcome) {
            Some(ExecutionOutcome::Failed { .. }) => StatusLevel::Error,
            Some(ExecutionOutcome::ConstructionRejected { .. })
            | Some(ExecutionOutcome::Unresolved { .. }) => StatusLevel::Warning,
            _ => StatusLevel::Info,
        };
        emitter.status(level, format!("Cycle {}: {decision}", metrics.iteration));
        emitter.dispatch_response(vec![text_part(decision.to_string())]);
    }

    fn halt(
        &self,
        mut state: AgentState,
        mut emitter: ActivityEmitter,
        cycle: u64,
        metrics: CycleMetrics,
        error: AgentError,
    ) -> CycleUpdate {
        let message = error.to_string();
        state.metrics = metrics;
        state.halt_reason = Some(message.clone());
        state.task = TaskStatus::with_message(TaskState::Failed, message.clone());
        emitter.status(StatusLevel::Error, message.clone());

        let mut report = CycleReport::new(cycle, CycleOutcome::Halted, state.task.state);
        report.reason = Some(message);
        self.finish(state, emitter, report)
    }

    fn finish(&self, mut state: AgentState, emitter: ActivityEmitter, report: CycleReport) -> CycleUpdate {
        state
            .activity
            .extend(emitter.into_records(), self.settings.max_activity_events);
        CycleUpdate { state, report }
    }
}

/// Input-required message after the order simulation refused the plan.
fn remediation(failure: &str, view: &MarketView) -> String {
    format!(
        "GMX order simulation failed: {failure}. Fund the wallet with {} collateral and native gas on chain {}, then continue.",
        view.target.short_token.symbol, view.target.chain_id,
    )
}
