//! Bid (buy-side) order book
//!
//! Maintains buy orders sorted by price descending (best bid first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::Order;

use super::price_level::PriceLevel;
use super::{BookSide, DepthLevel};

/// Bid (buy) side order book
///
/// Orders are sorted by price descending, so the highest bid is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    /// Price levels keyed ascending; iterated from the back for best bid
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    /// Create a new empty bid book
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Get the best bid (highest price)
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.levels
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.total_quantity()))
    }
}

impl BookSide for BidBook {
    fn insert(&mut self, price: Price, order: Order) {
        self.levels.entry(price).or_default().insert(order);
    }

    fn remove(&mut self, order_id: &OrderId, price: Price) -> Option<Order> {
        let level = self.levels.get_mut(&price)?;
        let order = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(order)
    }

    fn get(&self, order_id: &OrderId, price: Price) -> Option<&Order> {
        self.levels.get(&price)?.get(order_id)
    }

    fn best_level_mut(&mut self) -> Option<(Price, &mut PriceLevel)> {
        self.levels
            .iter_mut()
            .next_back()
            .map(|(price, level)| (*price, level))
    }

    fn drop_level_if_empty(&mut self, price: Price) {
        if self.levels.get(&price).is_some_and(PriceLevel::is_empty) {
            self.levels.remove(&price);
        }
    }

    fn level_quantity(&self, price: Price) -> Quantity {
        self.levels
            .get(&price)
            .map(PriceLevel::total_quantity)
            .unwrap_or_default()
    }

    fn depth_snapshot(&self, depth: usize) -> Vec<DepthLevel> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| DepthLevel::from_level(*price, level))
            .collect()
    }

    fn orders(&self) -> Box<dyn Iterator<Item = &Order> + '_> {
        Box::new(self.levels.values().rev().flat_map(PriceLevel::iter))
    }

    fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }
}
