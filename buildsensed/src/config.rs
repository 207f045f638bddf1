use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{error, info, warn};

use buildsense_core::config::BuildsenseConfig;
use buildsense_core::room::RoomSnapshot;

/// Load config from a TOML file and apply environment overrides.
pub fn load_config(path: &Path) -> Result<BuildsenseConfig> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env<F>(path: &Path, lookup: F) -> Result<BuildsenseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let mut config = BuildsenseConfig::from_toml_str(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    config
        .apply_env_overrides(lookup)
        .with_context(|| format!("applying environment overrides to {}", path.display()))?;
    Ok(config)
}

/// Validate config for internal consistency:
/// - budget, round timing and agent settings are in range
/// - an enabled coordinator has somewhere to read rooms from
pub fn validate_config(config: &BuildsenseConfig) -> Result<()> {
    config.validate()?;

    if config.coordinator.enabled && config.coordinator.snapshots_path.is_none() {
        anyhow::bail!("coordinator.enabled requires coordinator.snapshots_path");
    }

    let roster = config.agent_configs();
    if roster.iter().all(|agent| !agent.active) {
        warn!("every agent is inactive; all rounds will escalate");
    }

    info!(
        agents = roster.len(),
        requests_per_window = config.budget.requests_per_window,
        provider = %config.provider.provider,
        "config validation passed"
    );
    Ok(())
}

/// Where decisions are appended: `coordinator.decisions_path`, else
/// `<data_dir>/decisions.jsonl`.
pub fn decisions_path(config: &BuildsenseConfig) -> PathBuf {
    match &config.coordinator.decisions_path {
        Some(path) => PathBuf::from(path),
        None => Path::new(&config.global.data_dir).join("decisions.jsonl"),
    }
}

/// Sections changed between two configs that only take effect after a
/// restart. The roster and coordinator schedule are swapped live.
pub fn restart_required(current: &BuildsenseConfig, next: &BuildsenseConfig) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if next.budget.requests_per_window != current.budget.requests_per_window
        || next.budget.window != current.budget.window
    {
        sections.push("budget");
    }
    if next.provider.provider != current.provider.provider
        || next.provider.model != current.provider.model
        || next.provider.base_url != current.provider.base_url
    {
        sections.push("provider");
    }
    if next.round != current.round {
        sections.push("round");
    }
    sections
}

/// Read the JSON array of room snapshots prepared by the building layer.
pub fn load_snapshots(path: &Path) -> Result<Vec<RoomSnapshot>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading room snapshots: {}", path.display()))?;
    let snapshots: Vec<RoomSnapshot> = serde_json::from_str(&content)
        .with_context(|| format!("parsing room snapshots: {}", path.display()))?;
    Ok(snapshots)
}

/// Spawn a file watcher that sends updated configs on a watch channel when the file changes.
/// Returns the watcher (must be kept alive) and the watch receiver.
pub fn spawn_config_watcher(
    path: &Path,
) -> Result<(RecommendedWatcher, watch::Receiver<Arc<BuildsenseConfig>>)> {
    let initial = load_config(path)?;
    validate_config(&initial)?;
    let (tx, rx) = watch::channel(Arc::new(initial));

    let watched_path = path.to_path_buf();
    let mut watcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    info!("config file changed, reloading");
                    match reload(&watched_path) {
                        Ok(new_config) => {
                            if tx.send(Arc::new(new_config)).is_err() {
                                warn!("config watch channel closed");
                            }
                            info!("config reloaded successfully");
                        }
                        Err(e) => {
                            error!("new config rejected, keeping old config: {e:#}");
                        }
                    }
                }
            }
            Err(e) => {
                error!("config file watcher error: {e}");
            }
        })?;

    watcher.watch(path, RecursiveMode::NonRecursive)?;

    Ok((watcher, rx))
}

/// Load and validate in one step, for reloads.
pub fn reload(path: &Path) -> Result<BuildsenseConfig> {
    let config = load_config(path)?;
    validate_config(&config)?;
    Ok(config)
}
