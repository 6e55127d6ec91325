//! Matching Engine Service
//!
//! Order matching engine with strict price-time priority. All state
//! mutation goes through one sequencer task; books and ledger are only ever
//! observed between completed operations.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced
//! - Deterministic matching (same inputs → same outputs)
//! - Conservation of value: only deposits change per-asset totals
//! - Locked balances equal the reservations of resting orders

pub mod app;
pub mod book;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod messages;
pub mod sequencer;

pub use engine::{Applied, MatchingEngine};
pub use ledger::Ledger;
pub use sequencer::{EngineHandle, Sequencer};
