//! Matching logic module
//!
//! Implements price-time priority matching algorithm

pub mod crossing;
pub mod executor;

pub use crossing::{can_match, is_marketable};
pub use executor::MatchExecutor;
