//! GMX/Allora perpetuals agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or creates fresh), and runs the poll cycle
//! on a fixed interval with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use gmx_allora_agent::config::AppConfig;
use gmx_allora_agent::dashboard::{self, routes::DashboardState};
use gmx_allora_agent::engine::accountant::CycleReport;
use gmx_allora_agent::engine::cycle::{CycleSettings, PollCycle};
use gmx_allora_agent::engine::executor::{ExecutionMode, ExecutionOrchestrator, LifecyclePolicy};
use gmx_allora_agent::engine::market_data::{MarketDataProvider, MarketSelector};
use gmx_allora_agent::onchain::client::OnchainActionsClient;
use gmx_allora_agent::onchain::OnchainActions;
use gmx_allora_agent::signal::allora::AlloraClient;
use gmx_allora_agent::storage;
use gmx_allora_agent::strategy::exposure::ExposureCalculator;
use gmx_allora_agent::strategy::sizing::{OrderSizer, SizingConfig};
use gmx_allora_agent::strategy::{DecisionConfig, DecisionEngine};
use gmx_allora_agent::types::AgentState;
use gmx_allora_agent::wallet::evm::EvmWallet;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    info!(
        agent_name = %cfg.agent.name,
        poll_interval_secs = cfg.agent.poll_interval_secs,
        mode = ?cfg.execution.mode,
        pair = %format!("{}/{}", cfg.market.index_symbol, cfg.market.collateral_symbol),
        "Agent starting up"
    );

    // -- Restore or create state -----------------------------------------

    let state_file = cfg.agent.state_file.as_deref();
    let mut state = match storage::load_state(state_file)? {
        Some(s) => {
            info!(state = %s, "Resumed from saved state");
            s
        }
        None => {
            info!("Fresh start");
            AgentState::new()
        }
    };

    // -- Initialise components -------------------------------------------

    let cycle = build_cycle(&cfg)?;

    let dashboard_state = Arc::new(DashboardState::new(state.clone()));
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(dashboard_state.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.poll_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.poll_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    let mut stopping = false;
    while !stopping {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }

        if dashboard_state.take_resume_request() {
            info!(halt_reason = ?state.halt_reason, task = %state.task.state, "Resume requested");
            state.resume();
        }

        // Submitted transactions must be recorded, so a cycle in flight is
        // allowed to finish before shutdown.
        let update = {
            let run = cycle.run(&state);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    update = &mut run => break update,
                    _ = &mut shutdown, if !stopping => {
                        stopping = true;
                        warn!(
                            cycle = state.metrics.iteration + 1,
                            "Shutdown requested; finishing the in-flight cycle before exiting"
                        );
                    }
                }
            }
        };
        log_cycle_report(&update.report);
        state = update.state;

        if let Err(e) = storage::save_state(&state, state_file) {
            error!(error = %e, "Failed to save state");
        }
        dashboard_state.publish(&state, &update.report).await;
    }

    storage::save_state(&state, state_file)?;
    info!(state = %state, "Agent shut down cleanly.");

    Ok(())
}

/// Wire the poll cycle from configuration.
fn build_cycle(cfg: &AppConfig) -> Result<PollCycle> {
    let api_key = AppConfig::resolve_secret(&cfg.signal.api_key_env)?;
    let signal = Arc::new(AlloraClient::new(
        &cfg.signal.base_url,
        &cfg.signal.chain,
        api_key,
        Duration::from_secs(cfg.signal.timeout_secs),
    )?);

    let onchain: Arc<dyn OnchainActions> = Arc::new(OnchainActionsClient::new(
        &cfg.onchain.base_url,
        Duration::from_secs(cfg.onchain.timeout_secs),
    )?);

    let market_data = MarketDataProvider::new(
        onchain.clone(),
        &cfg.onchain.wallet_address,
        cfg.onchain.chain_ids.clone(),
        MarketSelector {
            index_symbol: cfg.market.index_symbol.clone(),
            collateral_symbol: cfg.market.collateral_symbol.clone(),
        },
    );

    let engine = DecisionEngine::new(
        DecisionConfig {
            threshold_pct: cfg.strategy.decision_threshold_pct,
            exposure_cap_usd: cfg.strategy.exposure_cap_usd,
            max_position_usd: cfg.strategy.max_position_usd,
            max_hold_secs: cfg.strategy.max_hold_secs,
        },
        ExposureCalculator::new(cfg.strategy.exposure_basis),
        OrderSizer::new(SizingConfig {
            order_size_usd: cfg.strategy.order_size_usd,
            min_order_usd: cfg.strategy.min_order_usd,
            leverage: cfg.strategy.leverage,
        }),
    );

    let mut executor = ExecutionOrchestrator::new(
        onchain,
        cfg.execution.mode,
        &cfg.onchain.provider_name,
        &cfg.onchain.wallet_address,
    )
    .with_lifecycle_policy(LifecyclePolicy {
        interval: Duration::from_millis(cfg.execution.lifecycle_poll_interval_ms),
        max_attempts: cfg.execution.lifecycle_max_attempts,
    });

    match cfg.execution.mode {
        ExecutionMode::Execute => {
            let rpc_url = cfg
                .execution
                .rpc_url
                .as_deref()
                .context("execution.rpc_url is required in execute mode")?;
            let key_env = cfg
                .execution
                .private_key_env
                .as_deref()
                .context("execution.private_key_env is required in execute mode")?;
            let wallet = EvmWallet::new(
                rpc_url,
                &AppConfig::resolve_secret(key_env)?,
                Duration::from_secs(cfg.execution.receipt_timeout_secs),
            )?;
            let signer = format!("{:#x}", wallet.address());
            if !signer.eq_ignore_ascii_case(&cfg.onchain.wallet_address) {
                warn!(
                    signer = %signer,
                    configured = %cfg.onchain.wallet_address,
                    "Signing key does not control onchain.wallet_address; plans target the configured wallet"
                );
            }
            executor = executor.with_wallet(Arc::new(wallet));
        }
        ExecutionMode::Simulate => {
            warn!("Simulate mode: plans are built but never submitted");
        }
    }

    Ok(PollCycle::new(
        signal,
        market_data,
        engine,
        executor,
        CycleSettings {
            topic_id: cfg.signal.topic_id,
            max_activity_events: cfg.agent.max_activity_events,
        },
    ))
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        outcome = ?report.outcome,
        action = ?report.action,
        reason = report.reason.as_deref().unwrap_or("-"),
        txs = report.tx_hashes.len(),
        task = %report.task_state,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gmx_allora_agent=info"));

    let json_logging = std::env::var("AGENT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
