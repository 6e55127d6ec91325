//! Persistence & Recovery Service
//!
//! Provides point-in-time state snapshots with integrity checks and crash
//! recovery for the matching engine.
//!
//! - Snapshots are versioned, bincode-encoded, SHA-256 checked and
//!   optionally zstd-compressed
//! - Deterministic serialization (sorted maps, normalized decimals)
//! - Recovery loads the newest snapshot that verifies

pub mod recovery;
pub mod snapshot;

pub use recovery::{Recovered, RecoveryEngine, RecoveryError};
pub use snapshot::{
    BalanceRecord, BookState, EngineState, Snapshot, SnapshotCleanupPolicy, SnapshotError,
    SnapshotIntervalPolicy, SnapshotLoader, SnapshotWriter,
};
