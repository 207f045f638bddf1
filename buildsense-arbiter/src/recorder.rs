use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use buildsense_core::decision::Decision;
use buildsense_core::error::RecorderError;

/// Sink for finished decisions (storage, dashboard feed).
#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn record(&self, decision: &Decision) -> Result<(), RecorderError>;
}

/// Append-only decision log, one JSON object per line.
#[derive(Clone)]
pub struct JsonlDecisionRecorder {
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
}

impl JsonlDecisionRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionRecorder for JsonlDecisionRecorder {
    async fn record(&self, decision: &Decision) -> Result<(), RecorderError> {
        let _guard = self.lock.lock().await;
        append_jsonl_line(&self.path, decision)
    }
}

pub(crate) fn append_jsonl_line<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_vec(value)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&line)?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// Read back a decision log. Malformed lines are skipped with a warning.
pub fn read_decisions(path: &Path) -> Result<Vec<Decision>, RecorderError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut decisions = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Decision>(&line) {
            Ok(decision) => decisions.push(decision),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping_malformed_decision"
                );
            }
        }
    }
    Ok(decisions)
}

/// Keeps decisions in memory. Can be switched to fail, to exercise the
/// delivery-failure path.
#[derive(Default)]
pub struct MemoryDecisionRecorder {
    decisions: std::sync::Mutex<Vec<Decision>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryDecisionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DecisionRecorder for MemoryDecisionRecorder {
    async fn record(&self, decision: &Decision) -> Result<(), RecorderError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RecorderError::Unavailable("memory recorder offline".into()));
        }
        self.decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(decision.clone());
        Ok(())
    }
}
