//! Order lifecycle types
//!
//! An order is created by the matching engine on intake, mutated only by
//! matching or cancellation, and leaves the book once Filled or Cancelled.

use crate::ids::{AssetId, MarketId, OrderId, UserId};
use crate::numeric::{Amount, Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order kind
///
/// Limit orders rest when not fully matched; market orders never rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Limit,
    Market,
}

/// Order status, derived from filled vs. requested quantity plus explicit
/// cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// Complete order structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub market: MarketId,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price; `None` for market orders
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub status: OrderStatus,
    /// Logical arrival sequence; breaks price ties (lower first)
    pub created_at: u64,
    /// Funds still locked against this order (quote for buys, base for sells)
    pub reserved: Amount,
}

impl Order {
    /// Create a new open order
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        market: MarketId,
        side: Side,
        kind: OrderKind,
        price: Option<Price>,
        quantity: Quantity,
        created_at: u64,
        reserved: Amount,
    ) -> Self {
        Self {
            order_id,
            user_id,
            market,
            side,
            kind,
            price,
            quantity,
            filled_quantity: Quantity::zero(),
            status: OrderStatus::Open,
            created_at,
            reserved,
        }
    }

    /// Quantity not yet matched
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Check if order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_quantity == self.quantity
    }

    /// Asset this order locks: quote for buys, base for sells
    pub fn reservation_asset(&self) -> AssetId {
        match self.side {
            Side::Buy => self.market.quote(),
            Side::Sell => self.market.base(),
        }
    }

    /// Record a fill and advance the status
    ///
    /// # Panics
    /// Panics if the fill would exceed the order quantity
    pub fn add_fill(&mut self, fill_quantity: Quantity) {
        let new_filled = self.filled_quantity + fill_quantity;
        assert!(new_filled <= self.quantity, "Fill would exceed order quantity");

        self.filled_quantity = new_filled;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    /// Mark the order cancelled
    ///
    /// # Panics
    /// Panics if order is already in terminal state
    pub fn cancel(&mut self) {
        assert!(!self.status.is_terminal(), "Cannot cancel terminal order");
        self.status = OrderStatus::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn limit(side: Side, price: u64, qty: &str) -> Order {
        Order::new(
            OrderId::new(),
            UserId::new(),
            MarketId::new("BTC/USDT"),
            side,
            OrderKind::Limit,
            Some(Price::from_u64(price)),
            Quantity::from_str(qty).unwrap(),
            1,
            Amount::zero(),
        )
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_order_creation() {
        let order = limit(Side::Buy, 50000, "1.0");

        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.remaining(), order.quantity);
        assert!(!order.is_filled());
    }

    #[test]
    fn test_order_fill() {
        let mut order = limit(Side::Buy, 50000, "1.0");

        order.add_fill(Quantity::from_str("0.3").unwrap());
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining(), Quantity::from_str("0.7").unwrap());

        order.add_fill(Quantity::from_str("0.7").unwrap());
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.is_filled());
        assert!(order.remaining().is_zero());
    }

    #[test]
    #[should_panic(expected = "Fill would exceed order quantity")]
    fn test_order_overfill_panics() {
        let mut order = limit(Side::Buy, 50000, "1.0");
        order.add_fill(Quantity::from_str("1.5").unwrap());
    }

    #[test]
    #[should_panic(expected = "Cannot cancel terminal order")]
    fn test_cancel_terminal_panics() {
        let mut order = limit(Side::Buy, 50000, "1.0");
        order.add_fill(Quantity::from_str("1.0").unwrap());
        order.cancel();
    }

    #[test]
    fn test_reservation_asset() {
        assert_eq!(limit(Side::Buy, 1, "1").reservation_asset(), AssetId::new("USDT"));
        assert_eq!(limit(Side::Sell, 1, "1").reservation_asset(), AssetId::new("BTC"));
    }

    #[test]
    fn test_order_serialization() {
        let order = limit(Side::Sell, 3000, "2.5");

        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"side\":\"SELL\""));
        assert!(json.contains("\"status\":\"OPEN\""));

        let deserialized: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, deserialized);
    }
}
