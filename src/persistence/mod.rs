//! Asynchronous persistence sink.
//!
//! Two lanes: a bounded best-effort channel for analytics rows (trades,
//! cycles, PnL, risk events, config audits) that drops newest with a warning
//! when full, and an unbounded never-dropped channel for risk checkpoints.
//! Checkpoints land in sqlite so the last one can be restored at startup;
//! everything else appends to a JSONL analytics log.

mod store;

pub use store::CheckpointStore;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::risk::RiskCheckpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Trade,
    Cycle,
    Pnl,
    RiskEvent,
    ConfigAudit,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteRequest {
    pub kind: WriteKind,
    pub payload: Value,
}

/// Cloneable handle; the drain tasks own the stores.
#[derive(Clone)]
pub struct AsyncWriter {
    analytics_tx: mpsc::Sender<WriteRequest>,
    checkpoint_tx: mpsc::UnboundedSender<RiskCheckpoint>,
}

impl AsyncWriter {
    /// Spawn the two drain tasks. Opening the checkpoint store is fatal on
    /// failure (startup aborts).
    pub fn spawn(
        checkpoint_store: Arc<CheckpointStore>,
        analytics_path: PathBuf,
        buffer_size: usize,
    ) -> Result<Self> {
        let (analytics_tx, mut analytics_rx) = mpsc::channel::<WriteRequest>(buffer_size);
        let (checkpoint_tx, mut checkpoint_rx) = mpsc::unbounded_channel::<RiskCheckpoint>();

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&analytics_path)?;
        info!(path = %analytics_path.display(), "analytics log opened");

        tokio::spawn(async move {
            while let Some(request) = analytics_rx.recv().await {
                match serde_json::to_string(&request) {
                    Ok(line) => {
                        if let Err(e) = writeln!(log, "{line}") {
                            error!(error = %e, "analytics write failed");
                        }
                    }
                    Err(e) => error!(error = %e, "analytics serialize failed"),
                }
            }
        });

        tokio::spawn(async move {
            while let Some(checkpoint) = checkpoint_rx.recv().await {
                if let Err(e) = checkpoint_store.write_checkpoint(&checkpoint) {
                    error!(error = %e, "risk checkpoint write failed");
                }
            }
        });

        Ok(Self {
            analytics_tx,
            checkpoint_tx,
        })
    }

    /// Best-effort analytics write; drops with a warning when the buffer is
    /// full.
    pub fn write(&self, kind: WriteKind, payload: Value) {
        let request = WriteRequest { kind, payload };
        if let Err(mpsc::error::TrySendError::Full(request)) = self.analytics_tx.try_send(request) {
            warn!(kind = ?request.kind, "write channel full, dropping non-critical write");
        }
    }

    /// Never-dropped lane for risk checkpoints.
    pub fn write_checkpoint(&self, checkpoint: RiskCheckpoint) {
        if self.checkpoint_tx.send(checkpoint).is_err() {
            error!("checkpoint channel closed, risk checkpoint lost");
        }
    }
}
