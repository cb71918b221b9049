//! End-to-end poll cycle scenarios against mock collaborators.

use rust_decimal_macros::dec;

use gmx_allora_agent::engine::accountant::CycleOutcome;
use gmx_allora_agent::engine::executor::ExecutionMode;
use gmx_allora_agent::onchain::{LifecycleStatus, OnchainError, OrderRequest};
use gmx_allora_agent::signal::SignalError;
use gmx_allora_agent::types::{
    ActionKind, AgentState, Side, StatusLevel, TaskState, TxStatus,
};

use crate::mock_collaborators::*;

/// State after a previous cycle saw BTC at 47000 and stayed flat.
fn primed_state() -> AgentState {
    let mut state = AgentState::new();
    state.metrics.iteration = 1;
    state.metrics.previous_price = Some(dec!(47000));
    state
}

#[tokio::test]
async fn test_transient_signal_failure_goes_stale() {
    let h = Harness::new(ExecutionMode::Simulate, vec![btc_usdc_market()]);
    h.signal.push(Err(SignalError::Transient("HTTP 503".into())));

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.outcome, CycleOutcome::Stale);
    assert_eq!(update.state.metrics.iteration, 2);
    assert_eq!(update.state.metrics.stale_cycles, 1);
    assert_eq!(update.state.metrics.previous_price, Some(dec!(47000)));
    assert_eq!(update.state.halt_reason, None);
    assert_eq!(update.state.task.state, TaskState::Working);
    let (_, level) = update.state.activity.latest_status().unwrap();
    assert_eq!(level, StatusLevel::Warning);
    assert!(h.onchain.requests().is_empty());
}

#[tokio::test]
async fn test_market_data_failure_halts() {
    let h = Harness::new(ExecutionMode::Simulate, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));
    h.onchain.fail_reads("HTTP 502 Bad Gateway");

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.outcome, CycleOutcome::Halted);
    let reason = update.state.halt_reason.clone().unwrap();
    assert!(reason.starts_with(&format!(
        "Failed to fetch GMX markets/positions from {ONCHAIN_URL}"
    )));
    assert_eq!(update.state.task.state, TaskState::Failed);
    assert!(update.state.is_blocked());
    assert!(h.onchain.requests().is_empty());
}

#[tokio::test]
async fn test_no_matching_market_halts() {
    let h = Harness::new(ExecutionMode::Simulate, vec![eth_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.outcome, CycleOutcome::Halted);
    let reason = update.state.halt_reason.unwrap();
    assert!(reason.starts_with("No GMX BTC/USDC market resolved"), "{reason}");
}

#[tokio::test]
async fn test_rejected_plan_requires_input_and_blocks() {
    let h = Harness::new(ExecutionMode::Execute, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));
    h.onchain.queue_plan(Err(OnchainError::OrderRejected {
        endpoint: format!("{ONCHAIN_URL}/perpetuals/long"),
        message: "insufficient collateral".into(),
    }));

    let update = h.cycle.run(&primed_state()).await;
    let state = update.state;

    assert_eq!(state.task.state, TaskState::InputRequired);
    let message = state.task.message.as_deref().unwrap();
    assert!(message.contains("insufficient collateral"));
    assert!(message.contains("Fund the wallet"), "{message}");
    assert!(message.contains("USDC"), "{message}");
    assert!(message.contains(&CHAIN_ID.to_string()), "{message}");
    assert_eq!(state.halt_reason.as_deref(), Some(""));
    assert_eq!(state.execution_error.as_deref(), Some(""));
    assert!(state.transactions.is_empty());
    assert!(h.wallet.sent().is_empty());
    assert_eq!(state.metrics.assumed_position_side, None);

    // Blocked until resumed.
    let fetches = h.signal.fetch_count();
    let blocked = h.cycle.run(&state).await;
    assert_eq!(blocked.report.outcome, CycleOutcome::Blocked);
    assert_eq!(blocked.state.metrics.iteration, state.metrics.iteration);
    assert_eq!(h.signal.fetch_count(), fetches);

    let mut resumed = blocked.state;
    resumed.resume();
    h.signal.push(Ok(prediction(dec!(48500))));
    let update = h.cycle.run(&resumed).await;
    assert_eq!(update.report.outcome, CycleOutcome::Decided);
    assert_eq!(update.state.task.state, TaskState::Working);
}

#[tokio::test]
async fn test_cancelled_order_records_failure() {
    let h = Harness::new(ExecutionMode::Execute, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));
    h.onchain
        .set_lifecycle(LifecycleStatus::Cancelled, Some("price impact too high"));

    let update = h.cycle.run(&primed_state()).await;
    let state = update.state;

    assert_eq!(state.task.state, TaskState::Working);
    assert!(state.execution_error.as_deref().unwrap().contains("cancelled"));
    assert_eq!(state.metrics.assumed_position_side, None);
    assert_eq!(state.transactions.len(), 1);
    assert_eq!(state.transactions[0].status, TxStatus::Failed);
    assert_eq!(update.report.tx_hashes.len(), 2);
}

#[tokio::test]
async fn test_filled_open_then_unchanged_signal_holds() {
    let h = Harness::new(ExecutionMode::Execute, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));
    h.signal.push(Ok(prediction(dec!(48000))));

    let first = h.cycle.run(&primed_state()).await;
    assert_eq!(first.report.action, Some(ActionKind::Open));
    assert_eq!(first.state.metrics.assumed_position_side, Some(Side::Long));
    assert_eq!(first.state.metrics.cycles_since_rebalance, 0);
    assert_eq!(first.state.transactions[0].status, TxStatus::Success);
    assert_eq!(first.state.execution_error, None);

    let second = h.cycle.run(&first.state).await;
    assert_eq!(second.report.action, Some(ActionKind::Hold));
    assert_eq!(h.onchain.open_requests(), 1);
    assert_eq!(second.state.transactions.len(), 1);
    assert_eq!(second.state.metrics.cycles_since_rebalance, 1);
}

#[tokio::test]
async fn test_flip_closes_before_anything_else() {
    let h = Harness::new(ExecutionMode::Execute, vec![btc_usdc_market()]);
    let market = btc_usdc_market();
    h.onchain
        .set_positions(vec![position(&market, Side::Long, dec!(100))]);
    h.signal.push(Ok(prediction(dec!(46000))));

    let mut prior = primed_state();
    prior.metrics.assumed_position_side = Some(Side::Long);

    let update = h.cycle.run(&prior).await;

    assert_eq!(update.report.action, Some(ActionKind::Close));
    let requests = h.onchain.requests();
    assert_eq!(requests.len(), 1);
    match &requests[0] {
        OrderRequest::Close(params) => assert_eq!(params.position_side, Side::Long),
        other => panic!("expected close, got {other}"),
    }
    assert_eq!(update.state.metrics.assumed_position_side, None);
}

#[tokio::test]
async fn test_approval_only_open_is_retried_next_cycle() {
    let h = Harness::new(ExecutionMode::Execute, vec![btc_usdc_market()]);
    h.onchain.queue_plan(Ok(approval_only_plan()));
    h.signal.push(Ok(prediction(dec!(48000))));
    h.signal.push(Ok(prediction(dec!(48000))));

    let first = h.cycle.run(&primed_state()).await;
    let pending = first.state.metrics.pending_open.unwrap();
    assert_eq!(pending.side, Side::Long);
    assert_eq!(first.state.metrics.assumed_position_side, None);
    assert_eq!(first.state.transactions[0].status, TxStatus::Pending);
    assert!(first.state.metrics.latest_cycle.as_ref().unwrap().approval_only);

    let second = h.cycle.run(&first.state).await;
    assert_eq!(second.report.action, Some(ActionKind::Open));
    assert_eq!(h.onchain.open_requests(), 2);
    assert_eq!(second.state.metrics.pending_open, None);
    assert_eq!(second.state.metrics.assumed_position_side, Some(Side::Long));
}

#[tokio::test]
async fn test_exposure_cap_blocks_open() {
    let h = Harness::new(
        ExecutionMode::Execute,
        vec![btc_usdc_market(), eth_usdc_market()],
    );
    h.onchain
        .set_positions(vec![position(&eth_usdc_market(), Side::Short, dec!(500))]);
    h.signal.push(Ok(prediction(dec!(48000))));

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.action, Some(ActionKind::Hold));
    assert!(update
        .report
        .reason
        .as_deref()
        .unwrap()
        .starts_with("Exposure limit reached"));
    assert!(h.onchain.requests().is_empty());
    assert!(update.state.transactions.is_empty());
}

#[tokio::test]
async fn test_simulate_mode_never_signs() {
    let h = Harness::new(ExecutionMode::Simulate, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.action, Some(ActionKind::Open));
    assert!(h.wallet.sent().is_empty());
    assert!(update.state.transactions.is_empty());
    assert_eq!(update.state.metrics.assumed_position_side, Some(Side::Long));
    assert!(update.report.tx_hashes.is_empty());
}

#[tokio::test]
async fn test_first_cycle_without_reference_holds() {
    let h = Harness::new(ExecutionMode::Simulate, vec![btc_usdc_market()]);
    h.signal.push(Ok(prediction(dec!(48000))));

    let update = h.cycle.run(&AgentState::new()).await;

    assert_eq!(update.report.action, Some(ActionKind::Hold));
    assert_eq!(update.state.metrics.previous_price, Some(dec!(48000)));
    assert!(h.onchain.requests().is_empty());
}

#[tokio::test]
async fn test_exposure_cap_blocks_short_open() {
    let h = Harness::new(
        ExecutionMode::Execute,
        vec![btc_usdc_market(), eth_usdc_market()],
    );
    h.onchain
        .set_positions(vec![position(&eth_usdc_market(), Side::Long, dec!(600))]);
    h.signal.push(Ok(prediction(dec!(46000))));

    let update = h.cycle.run(&primed_state()).await;

    assert_eq!(update.report.action, Some(ActionKind::Hold));
    let reason = update.report.reason.as_deref().unwrap();
    assert!(reason.starts_with("Exposure limit reached"), "{reason}");
    assert!(h.onchain.requests().is_empty());
    assert!(h.wallet.sent().is_empty());
    assert_eq!(update.state.metrics.assumed_position_side, None);
}

#[tokio::test]
async fn test_approval_only_retry_blocked_by_exposure_cap() {
    let h = Harness::new(
        ExecutionMode::Execute,
        vec![btc_usdc_market(), eth_usdc_market()],
    );
    h.onchain.queue_plan(Ok(approval_only_plan()));
    h.signal.push(Ok(prediction(dec!(48000))));
    h.signal.push(Ok(prediction(dec!(48000))));

    let first = h.cycle.run(&primed_state()).await;
    assert!(first.state.metrics.pending_open.is_some());
    assert_eq!(h.onchain.open_requests(), 1);

    // Exposure elsewhere fills the cap before the retry.
    h.onchain
        .set_positions(vec![position(&eth_usdc_market(), Side::Short, dec!(500))]);

    let second = h.cycle.run(&first.state).await;
    assert_eq!(second.report.action, Some(ActionKind::Hold));
    assert!(second
        .report
        .reason
        .as_deref()
        .unwrap()
        .starts_with("Exposure limit reached"));
    assert_eq!(h.onchain.open_requests(), 1);
    assert_eq!(second.state.metrics.pending_open, None);
    assert_eq!(second.state.metrics.assumed_position_side, None);
    assert_eq!(second.state.transactions.len(), 1);
}

#[tokio::test]
async fn test_stale_cycle_keeps_empty_halt_reason() {
    let h = Harness::new(ExecutionMode::Simulate, vec![btc_usdc_market()]);
    h.signal.push(Err(SignalError::Transient("timeout".into())));

    let mut prior = primed_state();
    prior.halt_reason = Some(String::new());
    assert!(!prior.is_blocked());

    let update = h.cycle.run(&prior).await;

    assert_eq!(update.report.outcome, CycleOutcome::Stale);
    assert_eq!(update.state.halt_reason.as_deref(), Some(""));
    assert_eq!(update.state.metrics.stale_cycles, 1);
}

#[tokio::test]
async fn test_max_hold_closes_aged_position() {
    let h = Harness::with_max_hold(ExecutionMode::Execute, vec![btc_usdc_market()], 3600);
    let market = btc_usdc_market();
    let mut aged = position(&market, Side::Long, dec!(100));
    aged.opened_at = Some(chrono::Utc::now() - chrono::Duration::hours(2));
    h.onchain.set_positions(vec![aged]);
    h.signal.push(Ok(prediction(dec!(48000))));

    let mut prior = primed_state();
    prior.metrics.assumed_position_side = Some(Side::Long);

    let update = h.cycle.run(&prior).await;

    assert_eq!(update.report.action, Some(ActionKind::Close));
    let reason = update.report.reason.as_deref().unwrap();
    assert!(reason.contains("past the 3600s limit"), "{reason}");
    match &h.onchain.requests()[..] {
        [OrderRequest::Close(params)] => assert_eq!(params.position_side, Side::Long),
        other => panic!("expected one close, got {other:?}"),
    }
    assert_eq!(update.state.metrics.assumed_position_side, None);
}
