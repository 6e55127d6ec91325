//! Fill generation and engine-wide sequence counters
//!
//! Hands out trade sequence numbers for fills and logical arrival numbers
//! (`created_at`) for orders. Both counters only move forward and are part
//! of the snapshot, so a restored engine continues where it stopped.

use types::ids::{MarketId, TradeId};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::Fill;

/// Match executor for handling fill generation
#[derive(Debug, Clone)]
pub struct MatchExecutor {
    trade_sequence: u64,
    order_sequence: u64,
}

impl MatchExecutor {
    /// Create a new executor with the next trade and order sequence numbers
    pub fn new(trade_sequence: u64, order_sequence: u64) -> Self {
        Self {
            trade_sequence,
            order_sequence,
        }
    }

    /// Get next trade sequence number (monotonically increasing)
    fn next_trade_sequence(&mut self) -> u64 {
        let seq = self.trade_sequence;
        self.trade_sequence += 1;
        seq
    }

    /// Next logical arrival number for an order entering the book
    pub fn next_order_sequence(&mut self) -> u64 {
        let seq = self.order_sequence;
        self.order_sequence += 1;
        seq
    }

    pub fn trade_sequence(&self) -> u64 {
        self.trade_sequence
    }

    pub fn order_sequence(&self) -> u64 {
        self.order_sequence
    }

    /// Build the fill for one match step
    ///
    /// `price` is the maker's resting price; the taker side is recorded on
    /// the fill.
    pub fn execute_fill(
        &mut self,
        market: &MarketId,
        maker: &Order,
        taker: &Order,
        price: Price,
        quantity: Quantity,
    ) -> Fill {
        Fill {
            trade_id: TradeId::new(),
            sequence: self.next_trade_sequence(),
            market: market.clone(),
            maker_order_id: maker.order_id,
            taker_order_id: taker.order_id,
            maker_user_id: maker.user_id,
            taker_user_id: taker.user_id,
            side: taker.side,
            price,
            quantity,
        }
    }
}

impl Default for MatchExecutor {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
