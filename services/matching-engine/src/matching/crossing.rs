//! Crossing detection logic
//!
//! Decides whether the best resting order on the opposite side is
//! marketable against an incoming order. Branches exhaustively over
//! {Buy, Sell} × {Limit, Market}.

use types::numeric::Price;
use types::order::{OrderKind, Side};

/// Check if a bid and ask can match at given prices
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if an incoming order can trade against a resting order at
/// `resting_price`
///
/// `bound` is the incoming order's limit price for limit orders, and the
/// market's configured price cap for market buys. A limit order without a
/// bound never crosses. Market sells take any bid.
pub fn is_marketable(
    side: Side,
    kind: OrderKind,
    bound: Option<Price>,
    resting_price: Price,
) -> bool {
    match (side, kind) {
        (Side::Buy, OrderKind::Limit) => bound.is_some_and(|limit| can_match(limit, resting_price)),
        (Side::Sell, OrderKind::Limit) => {
            bound.is_some_and(|limit| can_match(resting_price, limit))
        }
        (Side::Buy, OrderKind::Market) => bound.map_or(true, |cap| can_match(cap, resting_price)),
        (Side::Sell, OrderKind::Market) => true,
    }
}
