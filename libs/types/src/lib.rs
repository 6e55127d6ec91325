//! Types library for the matching engine
//!
//! Core type definitions shared by the engine and its persistence layer,
//! ensuring exact arithmetic and deterministic serialization.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TradeId, UserId, AssetId, MarketId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity, Amount)
//! - `order`: Order lifecycle types
//! - `trade`: Fill type
//! - `account`: Balance record
//! - `errors`: Error taxonomy

pub mod account;
pub mod errors;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::trade::*;
}
