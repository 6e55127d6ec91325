//! Snapshot System: State snapshots with integrity and compression
//!
//! Features:
//! - Full engine state serialization (resting orders per market, balances,
//!   sequence counters)
//! - BTreeMap / sorted vectors for deterministic serialization
//! - SHA-256 integrity hash over serialized state
//! - Optional zstd compression
//! - Snapshot versioning for forward compatibility
//! - Interval policy (every N operations)
//! - Cleanup policy (keep last N snapshots)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::account::Balance;
use types::ids::{AssetId, MarketId, UserId};
use types::order::Order;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

// ── Engine State ────────────────────────────────────────────────────

/// Full engine state for snapshot serialization.
///
/// Captured between engine steps, so it is always fully settled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineState {
    /// Sequence number of the last applied operation.
    pub sequence: u64,
    /// Next logical arrival number handed to an order.
    pub order_sequence: u64,
    /// Next trade sequence number.
    pub trade_sequence: u64,
    /// Resting orders per market.
    pub books: BTreeMap<MarketId, BookState>,
    /// Balance records sorted by (user, asset).
    pub balances: Vec<BalanceRecord>,
}

/// Resting orders of one market, each side in matching priority order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookState {
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

impl BookState {
    pub fn order_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub user_id: UserId,
    pub asset: AssetId,
    pub balance: Balance,
}

impl EngineState {
    /// Compute a deterministic SHA-256 hash of the state.
    pub fn compute_hash(&self) -> String {
        let bytes = bincode::serialize(self).expect("EngineState serialization should never fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn resting_order_count(&self) -> usize {
        self.books.values().map(BookState::order_count).sum()
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A complete snapshot of the engine state at a given sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version for forward compatibility.
    pub version: u32,
    /// Last applied operation sequence number.
    pub sequence: u64,
    /// Unix nanosecond timestamp when snapshot was taken.
    pub timestamp: i64,
    /// Full engine state.
    pub state: EngineState,
    /// SHA-256 hash of the serialized state.
    pub checksum: String,
    /// Whether the data on disk is zstd-compressed.
    pub compressed: bool,
}

impl Snapshot {
    /// Create a new snapshot with computed integrity hash.
    pub fn new(timestamp: i64, state: EngineState, compressed: bool) -> Self {
        let checksum = state.compute_hash();
        Self {
            version: SNAPSHOT_VERSION,
            sequence: state.sequence,
            timestamp,
            state,
            checksum,
            compressed,
        }
    }

    /// Verify the snapshot's integrity hash.
    pub fn verify_integrity(&self) -> bool {
        self.checksum == self.state.compute_hash()
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

/// Writes snapshots to disk with optional zstd compression.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    /// Create a new writer. `compress` enables zstd compression.
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot atomically: serialize → compress → write tmp → fsync → rename.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data =
            bincode::serialize(snapshot).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

/// Loads snapshots from disk, verifying integrity.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load a specific snapshot file.
    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);

        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: Snapshot = bincode::deserialize(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }

        if !snapshot.verify_integrity() {
            let actual = snapshot.state.compute_hash();
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual,
            });
        }

        Ok(snapshot)
    }

    /// Load the latest snapshot (highest sequence number).
    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        let path = self.find_latest()?;
        self.load(&path)
    }

    /// Find the path to the latest snapshot.
    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .pop()
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// List all snapshots as (sequence, path) pairs, ascending by sequence.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let snapshot_file = name.ends_with(".snap") || name.ends_with(".snap.zst");
            if name.starts_with("snapshot-") && snapshot_file {
                if let Some(seq) = Self::parse_sequence(&name) {
                    results.push((seq, entry.path()));
                }
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        let stripped = filename
            .trim_start_matches("snapshot-")
            .trim_end_matches(".snap.zst")
            .trim_end_matches(".snap");
        stripped.parse::<u64>().ok()
    }
}

// ── Snapshot Interval Policy ────────────────────────────────────────

/// Policy that determines when to create a new snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotIntervalPolicy {
    /// Create snapshot every N applied operations.
    pub op_interval: u64,
    /// Last sequence at which a snapshot was taken.
    pub last_snapshot_seq: u64,
}

impl SnapshotIntervalPolicy {
    pub fn with_interval(interval: u64) -> Self {
        Self {
            op_interval: interval,
            last_snapshot_seq: 0,
        }
    }

    /// Resume counting from a restored sequence.
    pub fn starting_at(mut self, seq: u64) -> Self {
        self.last_snapshot_seq = seq;
        self
    }

    /// Check if a snapshot should be taken at the given sequence.
    pub fn should_snapshot(&self, current_seq: u64) -> bool {
        self.op_interval > 0 && current_seq >= self.last_snapshot_seq + self.op_interval
    }

    /// Whether any operation was applied since the last snapshot.
    pub fn has_progress(&self, current_seq: u64) -> bool {
        current_seq > self.last_snapshot_seq
    }

    /// Record that a snapshot was taken at the given sequence.
    pub fn record_snapshot(&mut self, seq: u64) {
        self.last_snapshot_seq = seq;
    }
}

// ── Snapshot Cleanup Policy ─────────────────────────────────────────

/// Policy for cleaning up old snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    /// Maximum number of snapshots to retain.
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    /// Remove old snapshots, keeping only the most recent `max_snapshots`.
    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;

        let mut removed = Vec::new();
        if snapshots.len() > self.max_snapshots {
            let to_remove = snapshots.len() - self.max_snapshots;
            for (_, path) in snapshots.iter().take(to_remove) {
                fs::remove_file(path)?;
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
