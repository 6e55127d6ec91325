//! Price level implementation with FIFO queue
//!
//! A price level contains all resting orders at a specific price point.
//! Orders are kept in arrival order (ascending `created_at`) to enforce
//! time priority within the level.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::numeric::Quantity;
use types::order::Order;

/// A price level containing orders at a specific price
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Queue of orders at this price level (FIFO order)
    orders: VecDeque<Order>,
    /// Total remaining quantity at this level
    total_quantity: Quantity,
}

impl PriceLevel {
    /// Create a new empty price level
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_quantity: Quantity::zero(),
        }
    }

    /// Insert an order at the back of the queue (time priority)
    pub fn insert(&mut self, order: Order) {
        self.total_quantity += order.remaining();
        self.orders.push_back(order);
    }

    /// Remove an order from the queue by OrderId
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let position = self.orders.iter().position(|order| &order.order_id == order_id)?;
        let order = self.orders.remove(position)?;
        self.total_quantity = self.total_quantity.saturating_sub(order.remaining());
        Some(order)
    }

    /// Peek at the front order without removing it
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|order| &order.order_id == order_id)
    }

    /// Apply a fill to the front order
    ///
    /// `update` mutates the front order (fill quantity, reservation); the
    /// level total drops by `quantity`. A fully filled order is popped and
    /// returned as `Some`.
    pub fn fill_front(
        &mut self,
        quantity: Quantity,
        update: impl FnOnce(&mut Order),
    ) -> Option<Order> {
        let front = self.orders.front_mut()?;
        update(front);
        self.total_quantity = self.total_quantity.saturating_sub(quantity);
        if front.is_filled() {
            self.orders.pop_front()
        } else {
            None
        }
    }

    /// Check if the price level is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get the total remaining quantity at this price level
    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    /// Get the number of orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Orders in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}
