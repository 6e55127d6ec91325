//! Recovery Flow: Boot from the newest valid snapshot
//!
//! Recovery process:
//! 1. List snapshots, newest first
//! 2. Load and verify each until one passes version + checksum checks
//! 3. Hand the state back to the engine (or report a cold start)
//!
//! A corrupt newest snapshot falls back to the previous one instead of
//! aborting; only an unreadable snapshot directory is an error.

use crate::snapshot::{Snapshot, SnapshotError, SnapshotLoader};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

// ── Recovery Metrics ────────────────────────────────────────────────

/// Metrics collected during the recovery process.
#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    /// Time to find and load the snapshot.
    pub snapshot_load_time_ms: u64,
    /// Sequence number of the loaded snapshot (0 if none).
    pub snapshot_sequence: u64,
    /// Snapshots skipped because they failed to load or verify.
    pub snapshots_rejected: usize,
    /// Resting orders restored.
    pub orders_restored: usize,
    /// Balance records restored.
    pub balances_restored: usize,
    /// State hash of the restored state (empty on cold start).
    pub state_hash: String,
}

// ── Recovery Log Entry ──────────────────────────────────────────────

/// Structured recovery log entry for diagnostics.
#[derive(Debug, Clone)]
pub struct RecoveryLogEntry {
    pub stage: RecoveryStage,
    pub message: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStage {
    Start,
    SnapshotSearch,
    SnapshotLoad,
    SnapshotRejected,
    ColdStart,
    Complete,
}

/// Outcome of a recovery run.
#[derive(Debug)]
pub struct Recovered {
    /// The snapshot to restore from; `None` means start empty.
    pub snapshot: Option<Snapshot>,
    pub metrics: RecoveryMetrics,
}

// ── Recovery Engine ─────────────────────────────────────────────────

/// Orchestrates snapshot discovery and loading at startup.
pub struct RecoveryEngine {
    snapshot_dir: PathBuf,
    log: Vec<RecoveryLogEntry>,
    started: Instant,
}

impl RecoveryEngine {
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            log: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Find the newest snapshot that passes verification.
    pub fn recover(&mut self) -> Result<Recovered, RecoveryError> {
        self.started = Instant::now();
        let mut metrics = RecoveryMetrics::default();

        self.log_stage(RecoveryStage::Start, "Recovery started");

        let loader = SnapshotLoader::new(&self.snapshot_dir);
        let mut candidates = loader.list_snapshots()?;
        self.log_stage(
            RecoveryStage::SnapshotSearch,
            &format!("Found {} snapshot(s)", candidates.len()),
        );

        while let Some((seq, path)) = candidates.pop() {
            match loader.load(&path) {
                Ok(snapshot) => {
                    metrics.snapshot_load_time_ms = self.elapsed_ms();
                    metrics.snapshot_sequence = snapshot.sequence;
                    metrics.orders_restored = snapshot.state.resting_order_count();
                    metrics.balances_restored = snapshot.state.balances.len();
                    metrics.state_hash = snapshot.checksum.clone();

                    self.log_stage(
                        RecoveryStage::SnapshotLoad,
                        &format!("Loaded snapshot at sequence {}", seq),
                    );
                    info!(
                        sequence = seq,
                        path = %path.display(),
                        orders = metrics.orders_restored,
                        balances = metrics.balances_restored,
                        "snapshot loaded"
                    );
                    self.log_stage(RecoveryStage::Complete, "Recovery complete");

                    return Ok(Recovered {
                        snapshot: Some(snapshot),
                        metrics,
                    });
                }
                Err(e) => {
                    metrics.snapshots_rejected += 1;
                    warn!(sequence = seq, path = %path.display(), error = %e, "rejecting snapshot");
                    self.log_stage(
                        RecoveryStage::SnapshotRejected,
                        &format!("Snapshot {} rejected: {}", seq, e),
                    );
                }
            }
        }

        info!(
            dir = %self.snapshot_dir.display(),
            rejected = metrics.snapshots_rejected,
            "no usable snapshot, starting empty"
        );
        self.log_stage(RecoveryStage::ColdStart, "No usable snapshot");
        self.log_stage(RecoveryStage::Complete, "Recovery complete");

        Ok(Recovered {
            snapshot: None,
            metrics,
        })
    }

    /// Diagnostics collected by the last run.
    pub fn log(&self) -> &[RecoveryLogEntry] {
        &self.log
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn log_stage(&mut self, stage: RecoveryStage, message: &str) {
        let elapsed_ms = self.elapsed_ms();
        self.log.push(RecoveryLogEntry {
            stage,
            message: message.to_string(),
            elapsed_ms,
        });
    }
}
