//! Fill (trade execution) type
//!
//! A fill records one atomic match between exactly one maker and one taker.
//! Created only by the matching engine inside a match step; never mutated.

use crate::ids::{MarketId, OrderId, TradeId, UserId};
use crate::numeric::{Amount, Price, Quantity};
use crate::order::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub trade_id: TradeId,
    /// Engine-wide monotonic trade sequence
    pub sequence: u64,
    pub market: MarketId,

    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub taker_user_id: UserId,

    /// Taker side
    pub side: Side,
    /// Execution price: always the resting (maker) order's price
    pub price: Price,
    pub quantity: Quantity,
}

impl Fill {
    /// Trade value (price × quantity), exact; `None` past the value bound
    pub fn notional(&self) -> Option<Amount> {
        self.price.notional(self.quantity)
    }

    /// User receiving base and paying quote
    pub fn buyer(&self) -> UserId {
        match self.side {
            Side::Buy => self.taker_user_id,
            Side::Sell => self.maker_user_id,
        }
    }

    /// User receiving quote and delivering base
    pub fn seller(&self) -> UserId {
        match self.side {
            Side::Buy => self.maker_user_id,
            Side::Sell => self.taker_user_id,
        }
    }
}
