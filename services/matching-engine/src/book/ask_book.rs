//! Ask (sell-side) order book
//!
//! Maintains sell orders sorted by price ascending (best ask first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};
use types::order::Order;

use super::price_level::PriceLevel;
use super::{BookSide, DepthLevel};

/// Ask (sell) side order book
///
/// Orders are sorted by price ascending, so the lowest ask is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct AskBook {
    /// Price levels sorted ascending (lowest price first)
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
    /// Create a new empty ask book
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Get the best ask (lowest price)
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.levels
            .iter()
            .next()
            .map(|(price, level)| (*price, level.total_quantity()))
    }
}

impl BookSide for AskBook {
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
            .next()
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
            .take(depth)
            .map(|(price, level)| DepthLevel::from_level(*price, level))
            .collect()
    }

    fn orders(&self) -> Box<dyn Iterator<Item = &Order> + '_> {
        Box::new(self.levels.values().flat_map(PriceLevel::iter))
    }

    fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }
}
