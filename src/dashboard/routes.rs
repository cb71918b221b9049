//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::accountant::CycleReport;
use crate::types::{
    ActivityRecord, AgentState, CycleSummary, PositionSnapshot, Side, TaskState, TransactionRecord,
};

/// Entries kept in the in-memory cycle log.
const MAX_CYCLE_LOG: usize = 500;

const DEFAULT_ACTIVITY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub agent: RwLock<AgentState>,
    pub cycle_log: RwLock<Vec<CycleReport>>,
    resume_requested: AtomicBool,
}

impl DashboardState {
    pub fn new(initial_state: AgentState) -> Self {
        Self {
            agent: RwLock::new(initial_state),
            cycle_log: RwLock::new(Vec::new()),
            resume_requested: AtomicBool::new(false),
        }
    }

    /// Publish the state and report of a finished cycle.
    pub async fn publish(&self, state: &AgentState, report: &CycleReport) {
        *self.agent.write().await = state.clone();
        let mut log = self.cycle_log.write().await;
        log.push(report.clone());
        let excess = log.len().saturating_sub(MAX_CYCLE_LOG);
        if excess > 0 {
            log.drain(..excess);
        }
    }

    /// Consume a pending resume request.
    pub fn take_resume_request(&self) -> bool {
        self.resume_requested.swap(false, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub task_state: TaskState,
    pub task_message: Option<String>,
    pub halt_reason: Option<String>,
    pub execution_error: Option<String>,
    pub blocked: bool,
    pub iteration: u64,
    pub cycles_since_rebalance: u64,
    pub stale_cycles: u64,
    pub assumed_position_side: Option<Side>,
    pub previous_price: Option<Decimal>,
    pub transactions: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleResponse {
    pub latest_cycle: Option<CycleSummary>,
    pub snapshot: PositionSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeResponse {
    pub resume_requested: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let agent = state.agent.read().await;
    Json(StatusResponse {
        task_state: agent.task.state,
        task_message: agent.task.message.clone(),
        halt_reason: agent.halt_reason.clone(),
        execution_error: agent.execution_error.clone(),
        blocked: agent.is_blocked(),
        iteration: agent.metrics.iteration,
        cycles_since_rebalance: agent.metrics.cycles_since_rebalance,
        stale_cycles: agent.metrics.stale_cycles,
        assumed_position_side: agent.metrics.assumed_position_side,
        previous_price: agent.metrics.previous_price,
        transactions: agent.transactions.len(),
        uptime_secs: agent.uptime().num_seconds(),
    })
}

/// GET /api/cycle
pub async fn get_cycle(State(state): State<AppState>) -> Json<CycleResponse> {
    let agent = state.agent.read().await;
    Json(CycleResponse {
        latest_cycle: agent.metrics.latest_cycle.clone(),
        snapshot: agent.metrics.latest_snapshot.clone(),
    })
}

/// GET /api/cycles
pub async fn get_cycles(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    let log = state.cycle_log.read().await;
    // Return last 100 cycles
    let start = log.len().saturating_sub(100);
    Json(log[start..].to_vec())
}

/// GET /api/transactions
pub async fn get_transactions(State(state): State<AppState>) -> Json<Vec<TransactionRecord>> {
    let agent = state.agent.read().await;
    let start = agent.transactions.len().saturating_sub(100);
    Json(agent.transactions[start..].to_vec())
}

/// GET /api/activity?limit=N (most recent first)
pub async fn get_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Json<Vec<ActivityRecord>> {
    let agent = state.agent.read().await;
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    Json(agent.activity.recent(limit).into_iter().cloned().collect())
}

/// POST /api/resume
pub async fn post_resume(State(state): State<AppState>) -> (StatusCode, Json<ResumeResponse>) {
    state.resume_requested.store(true, Ordering::SeqCst);
    (
        StatusCode::ACCEPTED,
        Json(ResumeResponse {
            resume_requested: true,
        }),
    )
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
