//! Order book infrastructure module
//!
//! Contains price levels, the bid and ask books, and the per-market
//! [`OrderBook`] that runs the matching sweep.

pub mod price_level;
pub mod bid_book;
pub mod ask_book;
pub mod order_book;

use serde::{Deserialize, Serialize};
use types::errors::EngineError;
use types::ids::{MarketId, OrderId};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::Fill;

pub use price_level::PriceLevel;
pub use bid_book::BidBook;
pub use ask_book::AskBook;
pub use order_book::{MatchOutcome, OrderBook};

/// Operations shared by both sides of a book
///
/// "Best" means highest price for bids and lowest for asks; iteration
/// always runs in priority order.
pub trait BookSide {
    /// Append an order at the back of its price level
    fn insert(&mut self, price: Price, order: Order);

    /// Remove an order, dropping its level if it becomes empty
    fn remove(&mut self, order_id: &OrderId, price: Price) -> Option<Order>;

    fn get(&self, order_id: &OrderId, price: Price) -> Option<&Order>;

    /// Best price level, mutable for the matching sweep
    fn best_level_mut(&mut self) -> Option<(Price, &mut PriceLevel)>;

    fn drop_level_if_empty(&mut self, price: Price);

    /// Aggregate resting quantity at `price` (zero when the level is gone)
    fn level_quantity(&self, price: Price) -> Quantity;

    /// Top `depth` levels in priority order
    fn depth_snapshot(&self, depth: usize) -> Vec<DepthLevel>;

    /// All resting orders in priority order
    fn orders(&self) -> Box<dyn Iterator<Item = &Order> + '_>;

    fn is_empty(&self) -> bool;

    fn level_count(&self) -> usize;
}

/// Applies the balance legs of a fill
///
/// Called once per match step, before the book is mutated for that step.
pub trait Settlement {
    fn settle_fill(&mut self, fill: &Fill) -> Result<(), EngineError>;
}

/// One aggregated price level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: usize,
}

impl DepthLevel {
    pub fn from_level(price: Price, level: &PriceLevel) -> Self {
        Self {
            price,
            quantity: level.total_quantity(),
            order_count: level.order_count(),
        }
    }
}

/// Aggregated depth for one market
///
/// Bids are sorted descending and asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    pub market: MarketId,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}
