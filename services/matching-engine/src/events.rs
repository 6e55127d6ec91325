//! Event structures for matching engine
//!
//! Domain events emitted by every successful mutating operation, in the
//! order they happened inside the step.

use serde::{Deserialize, Serialize};
use types::ids::{MarketId, OrderId, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderStatus, Side};
use types::trade::Fill;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    OrderStatusChanged {
        order_id: OrderId,
        user_id: UserId,
        market: MarketId,
        status: OrderStatus,
        filled_quantity: Quantity,
        remaining_quantity: Quantity,
    },
    TradeExecuted {
        fill: Fill,
    },
    /// New aggregate at one price level; zero means the level is gone
    DepthChanged {
        market: MarketId,
        side: Side,
        price: Price,
        quantity: Quantity,
    },
}

impl EngineEvent {
    pub fn status_of(order: &Order) -> Self {
        EngineEvent::OrderStatusChanged {
            order_id: order.order_id,
            user_id: order.user_id,
            market: order.market.clone(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            remaining_quantity: order.remaining(),
        }
    }

    pub fn market(&self) -> &MarketId {
        match self {
            EngineEvent::OrderStatusChanged { market, .. } => market,
            EngineEvent::TradeExecuted { fill } => &fill.market,
            EngineEvent::DepthChanged { market, .. } => market,
        }
    }
}

/// Event tagged with its position in the engine's history
///
/// `sequence` is the operation that produced the event and `index` its
/// position within that operation, so `(sequence, index)` increases
/// strictly across the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub index: u32,
    pub event: EngineEvent,
}
