mod config;
mod shutdown;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use buildsense_agent::llm::build_llm_client;
use buildsense_agent::pool::AgentPool;
use buildsense_agent::rate_limiter::RateLimiter;
use buildsense_arbiter::{
    JsonlDecisionRecorder, LoggingDispatcher, RoundCoordinator, RoundSettings,
};
use buildsense_core::config::BuildsenseConfig;

/// Buildsense daemon: periodic multi-agent arbitration for smart-building rooms.
#[derive(Parser, Debug)]
#[command(name = "buildsensed", version, about)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "buildsense.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit.
    #[arg(long)]
    validate: bool,

    /// Run a single coordinator pass and exit.
    #[arg(long)]
    once: bool,
}

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Load and validate config
    // -----------------------------------------------------------------------
    let initial_config = config::load_config(&cli.config)?;
    config::validate_config(&initial_config)?;

    if cli.validate {
        println!("config is valid");
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 2. Initialize tracing / OTEL
    // -----------------------------------------------------------------------
    let telemetry_guard = telemetry::init_telemetry(&initial_config.otel, cli.verbose)?;

    info!(
        instance_id = %initial_config.global.instance_id,
        "buildsensed starting"
    );

    // -----------------------------------------------------------------------
    // 3. Reasoning provider, shared call budget, coordinator
    // -----------------------------------------------------------------------
    let client = build_llm_client(&initial_config.provider, |key| std::env::var(key).ok())?;
    if client.is_none() {
        warn!(
            provider = %initial_config.provider.provider,
            "reasoning provider not configured; agents use rule-based fallbacks"
        );
    }

    let limiter = Arc::new(RateLimiter::new(
        initial_config.budget.requests_per_window,
        initial_config.budget.window,
    ));
    info!(
        capacity = limiter.capacity(),
        window = ?limiter.window(),
        "reasoning call budget"
    );
    let decisions_path = config::decisions_path(&initial_config);
    info!(path = %decisions_path.display(), "decision log");

    let coordinator = Arc::new(RoundCoordinator::new(
        AgentPool::new(limiter),
        RoundSettings::from(&initial_config.round),
        client,
        Arc::new(JsonlDecisionRecorder::new(decisions_path)),
        Arc::new(LoggingDispatcher),
    ));
    coordinator.update_roster(&initial_config.agent_configs());

    if cli.once {
        if let Some(path) = snapshots_path(&initial_config) {
            run_pass(&coordinator, &path).await;
        } else {
            warn!("no coordinator.snapshots_path configured, nothing to do");
        }
        telemetry_guard.flush();
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 4. Config watch and signals
    // -----------------------------------------------------------------------
    let (_watcher, mut config_rx) = config::spawn_config_watcher(&cli.config)?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (reload_tx, mut reload_rx) = watch::channel(());
    tokio::spawn(shutdown::signal_listener(shutdown_tx, reload_tx));

    // -----------------------------------------------------------------------
    // 5. Main loop
    // -----------------------------------------------------------------------
    let mut current = Arc::new(initial_config);
    let mut ticker = tokio::time::interval(current.coordinator.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!(
        enabled = current.coordinator.enabled,
        interval = ?current.coordinator.interval,
        "entering main loop"
    );
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("shutdown signal received, beginning graceful shutdown");
                    break;
                }
            }
            Ok(()) = config_rx.changed() => {
                let next = config_rx.borrow_and_update().clone();
                apply_config(&coordinator, &current, &next, &mut ticker);
                current = next;
            }
            Ok(()) = reload_rx.changed() => {
                match config::reload(&cli.config) {
                    Ok(next) => {
                        let next = Arc::new(next);
                        apply_config(&coordinator, &current, &next, &mut ticker);
                        current = next;
                    }
                    Err(err) => error!("SIGHUP reload rejected, keeping old config: {err:#}"),
                }
            }
            _ = ticker.tick(), if current.coordinator.enabled => {
                if in_flight.as_ref().is_some_and(|pass| !pass.is_finished()) {
                    warn!("previous coordinator pass still running, skipping tick");
                    continue;
                }
                let Some(path) = snapshots_path(&current) else {
                    continue;
                };
                let coordinator = Arc::clone(&coordinator);
                in_flight = Some(tokio::spawn(async move {
                    run_pass(&coordinator, &path).await;
                }));
            }
        }
    }

    // -----------------------------------------------------------------------
    // 6. Graceful shutdown
    // -----------------------------------------------------------------------
    if let Some(pass) = in_flight {
        info!("graceful shutdown: waiting for in-flight rounds");
        match tokio::time::timeout(DRAIN_TIMEOUT, pass).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("coordinator pass failed: {err}"),
            Err(_) => error!("coordinator pass did not finish within {DRAIN_TIMEOUT:?}"),
        }
    }

    info!("graceful shutdown: flushing OTEL spans");
    telemetry_guard.flush();

    info!("buildsensed stopped");

    Ok(())
}

fn snapshots_path(config: &BuildsenseConfig) -> Option<PathBuf> {
    config.coordinator.snapshots_path.as_deref().map(PathBuf::from)
}

/// Swap in the parts of a new config that can change at runtime. The call
/// budget, reasoning provider and round timing are fixed for the life of the
/// process.
fn apply_config(
    coordinator: &RoundCoordinator,
    current: &BuildsenseConfig,
    next: &BuildsenseConfig,
    ticker: &mut tokio::time::Interval,
) {
    coordinator.update_roster(&next.agent_configs());

    if next.coordinator.interval != current.coordinator.interval {
        *ticker = tokio::time::interval(next.coordinator.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    }
    for section in config::restart_required(current, next) {
        warn!(section, "[{section}] changes take effect after restart");
    }
    info!(
        agents = next.agent_configs().len(),
        enabled = next.coordinator.enabled,
        "config applied"
    );
}

/// One round per room listed in the snapshots file.
async fn run_pass(coordinator: &Arc<RoundCoordinator>, path: &Path) {
    let snapshots = match config::load_snapshots(path) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            error!(path = %path.display(), "coordinator pass skipped: {err:#}");
            return;
        }
    };
    if snapshots.is_empty() {
        debug!(path = %path.display(), "no rooms to arbitrate");
        return;
    }

    let outcomes = coordinator.run_all(snapshots).await;
    let escalated = outcomes
        .iter()
        .filter(|outcome| outcome.decision.is_escalation())
        .count();
    let undelivered = outcomes
        .iter()
        .filter(|outcome| !outcome.delivered())
        .count();
    info!(
        rooms = outcomes.len(),
        escalated,
        undelivered,
        "coordinator_pass_completed"
    );
}
