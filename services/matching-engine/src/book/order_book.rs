//! Per-market order book
//!
//! Owns both sides of one market plus an id index, and runs the
//! price-time priority sweep for incoming orders.
//!
//! **Reservation accounting:** every resting order carries `reserved`, the
//! funds still locked against it. Each match step consumes exactly what the
//! ledger settles (`price × qty` quote from the buyer, `qty` base from the
//! seller). The remainder of an incoming order keeps only what it needs to
//! rest; everything else is reported back as `unused_reservation` for the
//! engine to release.

use std::cmp;
use std::collections::{BTreeSet, HashMap};

use persistence::BookState;
use types::errors::EngineError;
use types::ids::{MarketId, OrderId, UserId};
use types::numeric::{Amount, Price, Quantity};
use types::order::{Order, OrderKind, Side};
use types::trade::Fill;

use super::{AskBook, BidBook, BookSide, Depth, Settlement};
use crate::config::MarketConfig;
use crate::matching::{is_marketable, MatchExecutor};

/// Order book for a single market
#[derive(Debug, Clone)]
pub struct OrderBook {
    market: MarketId,
    market_buy_price_cap: Price,
    bids: BidBook,
    asks: AskBook,
    /// Resting order locations
    index: HashMap<OrderId, (Side, Price)>,
}

/// Result of running an incoming order through the book
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Final state of the incoming order
    pub order: Order,
    pub fills: Vec<Fill>,
    /// Maker states after each fill, in fill order
    pub makers: Vec<Order>,
    /// Part of the incoming order's reservation it no longer needs
    pub unused_reservation: Amount,
    /// Price levels whose aggregate quantity changed
    pub touched: Vec<(Side, Price)>,
}

impl MatchOutcome {
    /// Whether the remainder was placed on the book
    pub fn rested(&self) -> bool {
        !self.order.status.is_terminal()
    }
}

impl OrderBook {
    pub fn new(config: &MarketConfig) -> Self {
        Self {
            market: config.symbol.clone(),
            market_buy_price_cap: config.market_buy_price_cap,
            bids: BidBook::new(),
            asks: AskBook::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild a book from snapshot state
    ///
    /// Orders are re-inserted in `created_at` order so time priority within
    /// each level is exactly what it was when the snapshot was taken.
    pub fn restore(config: &MarketConfig, state: BookState) -> Result<Self, EngineError> {
        let mut book = Self::new(config);
        let mut orders: Vec<(Side, Order)> = state
            .bids
            .into_iter()
            .map(|order| (Side::Buy, order))
            .chain(state.asks.into_iter().map(|order| (Side::Sell, order)))
            .collect();
        orders.sort_by_key(|(_, order)| order.created_at);

        for (side, order) in orders {
            let price = book.validate_restored(side, &order)?;
            book.rest(side, price, order);
        }
        Ok(book)
    }

    fn validate_restored(&self, side: Side, order: &Order) -> Result<Price, EngineError> {
        let reject = |reason: &str| {
            EngineError::InvariantViolation(format!(
                "restored order {} in {}: {}",
                order.order_id, self.market, reason
            ))
        };
        if order.market != self.market {
            return Err(reject("belongs to another market"));
        }
        if order.side != side {
            return Err(reject("stored on the wrong side"));
        }
        if order.kind != OrderKind::Limit {
            return Err(reject("market orders never rest"));
        }
        if order.status.is_terminal() || order.remaining().is_zero() {
            return Err(reject("order is not open"));
        }
        if self.index.contains_key(&order.order_id) {
            return Err(reject("duplicate order id"));
        }
        let price = order.price.ok_or_else(|| reject("missing limit price"))?;
        let needed = Self::resting_requirement(side, price, order.remaining())?;
        if order.reserved != needed {
            return Err(reject("reservation does not cover the open quantity"));
        }
        Ok(price)
    }

    pub fn market_buy_price_cap(&self) -> Price {
        self.market_buy_price_cap
    }

    /// Price bound used for marketability: the limit for limit orders, the
    /// configured cap for market buys, none for market sells
    pub fn match_bound(&self, side: Side, kind: OrderKind, price: Option<Price>) -> Option<Price> {
        match (side, kind) {
            (_, OrderKind::Limit) => price,
            (Side::Buy, OrderKind::Market) => Some(self.market_buy_price_cap),
            (Side::Sell, OrderKind::Market) => None,
        }
    }

    /// Funds an order still needs locked to rest with `quantity` open
    fn resting_requirement(
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Result<Amount, EngineError> {
        match side {
            Side::Buy => price.notional(quantity).ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "resting value of {} at {} is out of range",
                    quantity, price
                ))
            }),
            Side::Sell => Ok(Amount::from(quantity)),
        }
    }

    /// Match an incoming order and dispose of its remainder
    ///
    /// Each match step builds the fill, settles it through `settlement`, and
    /// only then mutates the book, so a settlement failure never leaves an
    /// unsettled match behind. A limit remainder rests with a fresh
    /// `created_at`; a market remainder is cancelled.
    pub fn add_and_match<S: Settlement>(
        &mut self,
        mut order: Order,
        executor: &mut MatchExecutor,
        settlement: &mut S,
    ) -> Result<MatchOutcome, EngineError> {
        if order.market != self.market {
            return Err(EngineError::InvalidOrder(format!(
                "order for {} routed to {}",
                order.market, self.market
            )));
        }

        let bound = self.match_bound(order.side, order.kind, order.price);
        let sweep = match order.side {
            Side::Buy => sweep(
                &mut self.asks,
                &mut self.index,
                &mut order,
                bound,
                executor,
                settlement,
            )?,
            Side::Sell => sweep(
                &mut self.bids,
                &mut self.index,
                &mut order,
                bound,
                executor,
                settlement,
            )?,
        };

        let mut touched: Vec<(Side, Price)> = sweep
            .touched
            .into_iter()
            .map(|price| (order.side.opposite(), price))
            .collect();

        let unused_reservation = if order.remaining().is_zero() {
            std::mem::take(&mut order.reserved)
        } else {
            match order.kind {
                OrderKind::Limit => {
                    let price = order.price.ok_or_else(|| {
                        EngineError::InvalidOrder("limit order requires a price".to_string())
                    })?;
                    let needed =
                        Self::resting_requirement(order.side, price, order.remaining())?;
                    let unused = order.reserved.checked_sub(needed).ok_or_else(|| {
                        EngineError::InvariantViolation(format!(
                            "order {} reserved {} but needs {} to rest",
                            order.order_id, order.reserved, needed
                        ))
                    })?;
                    order.reserved = needed;
                    order.created_at = executor.next_order_sequence();
                    self.rest(order.side, price, order.clone());
                    touched.push((order.side, price));
                    unused
                }
                OrderKind::Market => {
                    order.cancel();
                    std::mem::take(&mut order.reserved)
                }
            }
        };

        Ok(MatchOutcome {
            order,
            fills: sweep.fills,
            makers: sweep.makers,
            unused_reservation,
            touched,
        })
    }

    fn rest(&mut self, side: Side, price: Price, order: Order) {
        self.index.insert(order.order_id, (side, price));
        match side {
            Side::Buy => self.bids.insert(price, order),
            Side::Sell => self.asks.insert(price, order),
        }
    }

    /// Remove a resting order and mark it cancelled
    ///
    /// The returned order still carries its `reserved` amount, which the
    /// caller releases.
    pub fn cancel(&mut self, order_id: &OrderId) -> Result<Order, EngineError> {
        let (side, price) = self.index.remove(order_id).ok_or_else(|| EngineError::OrderNotFound {
            order_id: order_id.to_string(),
        })?;
        let removed = match side {
            Side::Buy => self.bids.remove(order_id, price),
            Side::Sell => self.asks.remove(order_id, price),
        };
        let mut order = removed.ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "order {} indexed at {} {:?} but missing from the book",
                order_id, price, side
            ))
        })?;
        order.cancel();
        Ok(order)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        let (side, price) = self.index.get(order_id)?;
        match side {
            Side::Buy => self.bids.get(order_id, *price),
            Side::Sell => self.asks.get(order_id, *price),
        }
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.index.contains_key(order_id)
    }

    /// Resting orders of one user, bids first, each side in priority order
    pub fn open_orders(&self, user_id: &UserId) -> Vec<Order> {
        self.orders()
            .filter(|order| &order.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Every resting order, bids first
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.bids.orders().chain(self.asks.orders())
    }

    /// Aggregated depth, truncated to `levels` entries per side
    pub fn depth(&self, levels: usize) -> Depth {
        Depth {
            market: self.market.clone(),
            bids: self.bids.depth_snapshot(levels),
            asks: self.asks.depth_snapshot(levels),
        }
    }

    pub fn level_quantity(&self, side: Side, price: Price) -> Quantity {
        match side {
            Side::Buy => self.bids.level_quantity(price),
            Side::Sell => self.asks.level_quantity(price),
        }
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best_bid()
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best_ask()
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    /// Snapshot of all resting orders, each side in priority order
    pub fn state(&self) -> BookState {
        BookState {
            bids: self.bids.orders().cloned().collect(),
            asks: self.asks.orders().cloned().collect(),
        }
    }
}

#[derive(Default)]
struct Sweep {
    fills: Vec<Fill>,
    makers: Vec<Order>,
    touched: BTreeSet<Price>,
}

/// Walk the opposite side in priority order while it stays marketable
fn sweep<B: BookSide, S: Settlement>(
    opposite: &mut B,
    index: &mut HashMap<OrderId, (Side, Price)>,
    taker: &mut Order,
    bound: Option<Price>,
    executor: &mut MatchExecutor,
    settlement: &mut S,
) -> Result<Sweep, EngineError> {
    let mut result = Sweep::default();

    while !taker.remaining().is_zero() {
        let Some((price, level)) = opposite.best_level_mut() else {
            break;
        };
        if !is_marketable(taker.side, taker.kind, bound, price) {
            break;
        }

        let maker = level.front().ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "empty price level {} in {}",
                price, taker.market
            ))
        })?;
        let quantity = cmp::min(taker.remaining(), maker.remaining());
        let notional = price.notional(quantity).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "fill value of {} at {} is out of range",
                quantity, price
            ))
        })?;
        let (taker_cost, maker_cost) = match taker.side {
            Side::Buy => (notional, Amount::from(quantity)),
            Side::Sell => (Amount::from(quantity), notional),
        };
        let taker_reserved = consume(taker, taker_cost)?;
        let maker_reserved = consume(maker, maker_cost)?;

        let fill = executor.execute_fill(&taker.market, maker, taker, price, quantity);
        settlement.settle_fill(&fill)?;

        taker.add_fill(quantity);
        taker.reserved = taker_reserved;

        let maker_after = match level.fill_front(quantity, |maker| {
            maker.add_fill(quantity);
            maker.reserved = maker_reserved;
        }) {
            Some(filled) => {
                index.remove(&filled.order_id);
                filled
            }
            None => level.front().cloned().ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "maker vanished at {} in {}",
                    price, taker.market
                ))
            })?,
        };
        opposite.drop_level_if_empty(price);

        result.touched.insert(price);
        result.makers.push(maker_after);
        result.fills.push(fill);
    }

    Ok(result)
}

/// Reservation left on `order` after paying `cost`
fn consume(order: &Order, cost: Amount) -> Result<Amount, EngineError> {
    order.reserved.checked_sub(cost).ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "order {} reserved {} cannot cover {}",
            order.order_id, order.reserved, cost
        ))
    })
}
