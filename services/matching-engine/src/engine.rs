//! Matching engine core
//!
//! Single entry point for every operation. Each call runs to completion
//! before the next one starts, and a failed call leaves books and ledger
//! exactly as they were, with one exception: an `InvariantViolation` halts
//! the engine, after which only reads are served.

use std::collections::BTreeMap;

use persistence::EngineState;
use tracing::{debug, error, info, warn};
use types::account::Balance;
use types::errors::EngineError;
use types::ids::{AssetId, MarketId, OrderId, UserId};
use types::numeric::{Amount, Price, Quantity};
use types::order::{Order, OrderKind, Side};

use crate::book::{Depth, MatchOutcome, OrderBook};
use crate::config::MarketConfig;
use crate::events::{EngineEvent, EventEnvelope};
use crate::ledger::Ledger;
use crate::matching::MatchExecutor;
use crate::messages::{BalanceView, CancelAck, CreditAck, OrderAck, Request, ResponseBody};

/// Direct response of a mutating call plus the events it produced
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub response: T,
    pub events: Vec<EventEnvelope>,
}

impl<T> Applied<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            response: f(self.response),
            events: self.events,
        }
    }
}

/// Main matching engine
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    books: BTreeMap<MarketId, OrderBook>,
    ledger: Ledger,
    /// Trade and order arrival sequence generation
    executor: MatchExecutor,
    /// Last applied mutating operation
    sequence: u64,
    halted: Option<String>,
}

impl MatchingEngine {
    /// Empty engine with one book per configured market
    pub fn new(markets: &[MarketConfig]) -> Self {
        let books = markets
            .iter()
            .map(|config| (config.symbol.clone(), OrderBook::new(config)))
            .collect();
        Self {
            books,
            ledger: Ledger::new(),
            executor: MatchExecutor::default(),
            sequence: 0,
            halted: None,
        }
    }

    /// Rebuild an engine from snapshot state
    ///
    /// Every book in `state` must belong to a configured market, and for
    /// every `(user, asset)` the ledger's locked balance must equal the sum
    /// of the reservations of that user's resting orders.
    pub fn restore(markets: &[MarketConfig], mut state: EngineState) -> Result<Self, EngineError> {
        let mut books = BTreeMap::new();
        for config in markets {
            let book = match state.books.remove(&config.symbol) {
                Some(book_state) => OrderBook::restore(config, book_state)?,
                None => OrderBook::new(config),
            };
            books.insert(config.symbol.clone(), book);
        }
        if let Some(market) = state.books.keys().next() {
            return Err(EngineError::InvariantViolation(format!(
                "snapshot contains unconfigured market {}",
                market
            )));
        }

        let ledger = Ledger::from_records(state.balances)?;
        let engine = Self {
            books,
            ledger,
            executor: MatchExecutor::new(state.trade_sequence, state.order_sequence),
            sequence: state.sequence,
            halted: None,
        };
        engine.verify_reservations()?;
        engine.verify_sequences()?;

        info!(
            sequence = engine.sequence,
            orders = engine.resting_order_count(),
            "engine restored"
        );
        Ok(engine)
    }

    /// Check that locked balances are backed exactly by resting orders
    pub fn verify_reservations(&self) -> Result<(), EngineError> {
        let mut expected: BTreeMap<(UserId, AssetId), Amount> = BTreeMap::new();
        for order in self.books.values().flat_map(OrderBook::orders) {
            *expected
                .entry((order.user_id, order.reservation_asset()))
                .or_default() += order.reserved;
        }

        for (user, asset, balance) in self.ledger.iter() {
            let reserved = expected
                .remove(&(*user, asset.clone()))
                .unwrap_or_default();
            if balance.locked != reserved {
                return Err(EngineError::InvariantViolation(format!(
                    "user {} asset {} has {} locked but {} reserved by resting orders",
                    user, asset, balance.locked, reserved
                )));
            }
        }
        match expected.into_iter().find(|(_, amount)| amount.is_positive()) {
            Some(((user, asset), amount)) => Err(EngineError::InvariantViolation(format!(
                "user {} asset {} has {} reserved by resting orders but no balance",
                user, asset, amount
            ))),
            None => Ok(()),
        }
    }

    fn verify_sequences(&self) -> Result<(), EngineError> {
        let last_arrival = self
            .books
            .values()
            .flat_map(OrderBook::orders)
            .map(|order| order.created_at)
            .max();
        match last_arrival {
            Some(created_at) if created_at >= self.executor.order_sequence() => {
                Err(EngineError::InvariantViolation(format!(
                    "order sequence {} is not past resting arrival {}",
                    self.executor.order_sequence(),
                    created_at
                )))
            }
            _ => Ok(()),
        }
    }

    /// Full state for a snapshot; always between completed operations
    pub fn state(&self) -> EngineState {
        EngineState {
            sequence: self.sequence,
            order_sequence: self.executor.order_sequence(),
            trade_sequence: self.executor.trade_sequence(),
            books: self
                .books
                .iter()
                .map(|(market, book)| (market.clone(), book.state()))
                .collect(),
            balances: self.ledger.records(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketId> {
        self.books.keys()
    }

    pub fn resting_order_count(&self) -> usize {
        self.books.values().map(OrderBook::order_count).sum()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Dispatch a request to the matching operation
    pub fn handle(&mut self, request: Request) -> Result<Applied<ResponseBody>, EngineError> {
        match request {
            Request::CreateOrder {
                user_id,
                market,
                side,
                kind,
                price,
                quantity,
            } => self
                .create_order(user_id, &market, side, kind, price, quantity)
                .map(|applied| applied.map(ResponseBody::OrderCreated)),
            Request::CancelOrder { order_id, market } => self
                .cancel_order(&order_id, &market)
                .map(|applied| applied.map(ResponseBody::OrderCancelled)),
            Request::CreditFunds {
                user_id,
                asset,
                amount,
            } => self
                .credit_funds(user_id, &asset, amount)
                .map(|applied| applied.map(ResponseBody::FundsCredited)),
            Request::GetDepth { market, levels } => {
                read_only(ResponseBody::Depth(self.get_depth(&market, levels)?))
            }
            Request::GetOpenOrders { user_id, market } => read_only(ResponseBody::OpenOrders {
                orders: self.get_open_orders(&user_id, &market)?,
            }),
            Request::GetBalance { user_id, asset } => {
                let balance = self.get_balance(&user_id, &asset);
                read_only(ResponseBody::Balance(BalanceView::new(user_id, asset, balance)))
            }
            Request::GetOrder { order_id, market } => {
                read_only(ResponseBody::Order(self.get_order(&order_id, &market)?))
            }
        }
    }

    /// Validate, reserve, match, and release whatever the order no longer
    /// needs
    pub fn create_order(
        &mut self,
        user_id: UserId,
        market: &MarketId,
        side: Side,
        kind: OrderKind,
        price: Option<Price>,
        quantity: Quantity,
    ) -> Result<Applied<OrderAck>, EngineError> {
        self.ensure_writable()?;
        let book = self.book(market)?;

        if !quantity.is_positive() {
            return Err(reject(EngineError::InvalidOrder("quantity must be positive".to_string())));
        }
        let price = match kind {
            OrderKind::Limit => match price {
                Some(limit) if limit.is_positive() => Some(limit),
                _ => {
                    return Err(reject(EngineError::InvalidOrder(
                        "limit order requires a positive price".to_string(),
                    )))
                }
            },
            OrderKind::Market => None,
        };

        let reserve_asset = match side {
            Side::Buy => market.quote(),
            Side::Sell => market.base(),
        };
        // Bounded here, so every fill and resting requirement it funds is too
        let reservation = match (side, price) {
            (Side::Buy, Some(limit)) => limit.notional(quantity),
            (Side::Buy, None) => book.market_buy_price_cap().notional(quantity),
            (Side::Sell, _) => Some(Amount::from(quantity)),
        };
        let reservation = reservation.ok_or_else(|| {
            reject(EngineError::InvalidOrder(format!(
                "order value of {} exceeds the maximum",
                quantity
            )))
        })?;
        self.ledger
            .reserve(user_id, &reserve_asset, reservation)
            .map_err(reject)?;

        let order = Order::new(
            OrderId::new(),
            user_id,
            market.clone(),
            side,
            kind,
            price,
            quantity,
            self.executor.next_order_sequence(),
            reservation,
        );
        debug!(order_id = %order.order_id, %market, ?side, ?kind, %quantity, "order accepted");

        let outcome = match self.books.get_mut(market) {
            Some(book) => book.add_and_match(order, &mut self.executor, &mut self.ledger),
            None => Err(EngineError::InvariantViolation(format!(
                "book for {} disappeared",
                market
            ))),
        };
        let outcome = self.guard(outcome)?;

        if outcome.unused_reservation.is_positive() {
            let released = self
                .ledger
                .release(user_id, &reserve_asset, outcome.unused_reservation);
            self.guard(released)?;
        }

        self.sequence += 1;
        let events = self.match_events(market, &outcome);
        let taker = &outcome.order;
        let average_price = outcome
            .fills
            .iter()
            .try_fold(Amount::zero(), |acc, fill| acc.checked_add(fill.notional()?))
            .and_then(|total| Price::average(total, taker.filled_quantity));
        debug!(
            order_id = %taker.order_id,
            status = ?taker.status,
            fills = outcome.fills.len(),
            sequence = self.sequence,
            "order processed"
        );

        let response = OrderAck {
            order_id: taker.order_id,
            status: taker.status,
            filled_quantity: taker.filled_quantity,
            remaining_quantity: taker.remaining(),
            average_price,
            fills: outcome.fills.clone(),
        };
        Ok(Applied { response, events })
    }

    /// Remove a resting order and unlock what it still reserved
    pub fn cancel_order(
        &mut self,
        order_id: &OrderId,
        market: &MarketId,
    ) -> Result<Applied<CancelAck>, EngineError> {
        self.ensure_writable()?;
        let book = self.book_mut(market)?;
        let cancelled = book.cancel(order_id).map_err(reject);
        let order = self.guard(cancelled)?;

        let released = self
            .ledger
            .release(order.user_id, &order.reservation_asset(), order.reserved);
        self.guard(released)?;

        self.sequence += 1;
        let price = order.price.unwrap_or_default();
        let level_quantity = self.book(market)?.level_quantity(order.side, price);
        let events = self.envelope(vec![
            EngineEvent::status_of(&order),
            EngineEvent::DepthChanged {
                market: market.clone(),
                side: order.side,
                price,
                quantity: level_quantity,
            },
        ]);
        debug!(%order_id, released = %order.reserved, sequence = self.sequence, "order cancelled");

        Ok(Applied {
            response: CancelAck {
                order_id: order.order_id,
                released_quantity: order.remaining(),
                released_amount: order.reserved,
            },
            events,
        })
    }

    /// External deposit into available balance
    pub fn credit_funds(
        &mut self,
        user_id: UserId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<Applied<CreditAck>, EngineError> {
        self.ensure_writable()?;
        let new_available = self.ledger.credit(user_id, asset, amount).map_err(reject)?;
        self.sequence += 1;
        debug!(%user_id, %asset, %amount, sequence = self.sequence, "funds credited");

        Ok(Applied {
            response: CreditAck {
                user_id,
                asset: asset.clone(),
                new_available,
            },
            events: Vec::new(),
        })
    }

    pub fn get_depth(&self, market: &MarketId, levels: usize) -> Result<Depth, EngineError> {
        Ok(self.book(market)?.depth(levels))
    }

    pub fn get_open_orders(
        &self,
        user_id: &UserId,
        market: &MarketId,
    ) -> Result<Vec<Order>, EngineError> {
        Ok(self.book(market)?.open_orders(user_id))
    }

    pub fn get_balance(&self, user_id: &UserId, asset: &AssetId) -> Balance {
        self.ledger.balance(user_id, asset)
    }

    /// A resting order; filled and cancelled orders are no longer held
    pub fn get_order(&self, order_id: &OrderId, market: &MarketId) -> Result<Order, EngineError> {
        self.book(market)?
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    fn book(&self, market: &MarketId) -> Result<&OrderBook, EngineError> {
        self.books
            .get(market)
            .ok_or_else(|| EngineError::InvalidOrder(format!("unknown market {}", market)))
    }

    fn book_mut(&mut self, market: &MarketId) -> Result<&mut OrderBook, EngineError> {
        self.books
            .get_mut(market)
            .ok_or_else(|| EngineError::InvalidOrder(format!("unknown market {}", market)))
    }

    fn ensure_writable(&self) -> Result<(), EngineError> {
        match &self.halted {
            Some(reason) => Err(EngineError::EngineHalted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Halt on a fatal error; pass everything else through
    fn guard<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.halt(err);
            }
        }
        result
    }

    /// Refuse all further writes; reads keep serving the frozen state
    pub(crate) fn halt(&mut self, err: &EngineError) {
        error!(
            error = %err,
            sequence = self.sequence,
            "invariant violated, halting engine"
        );
        self.halted = Some(err.to_string());
    }

    /// Trade, maker and taker status, then depth changes, in that order
    fn match_events(&self, market: &MarketId, outcome: &MatchOutcome) -> Vec<EventEnvelope> {
        let mut events = Vec::with_capacity(outcome.fills.len() * 2 + outcome.touched.len() + 1);
        for (fill, maker) in outcome.fills.iter().zip(&outcome.makers) {
            events.push(EngineEvent::TradeExecuted { fill: fill.clone() });
            events.push(EngineEvent::status_of(maker));
        }
        events.push(EngineEvent::status_of(&outcome.order));

        if let Some(book) = self.books.get(market) {
            for (side, price) in &outcome.touched {
                events.push(EngineEvent::DepthChanged {
                    market: market.clone(),
                    side: *side,
                    price: *price,
                    quantity: book.level_quantity(*side, *price),
                });
            }
        }
        self.envelope(events)
    }

    fn envelope(&self, events: Vec<EngineEvent>) -> Vec<EventEnvelope> {
        events
            .into_iter()
            .enumerate()
            .map(|(index, event)| EventEnvelope {
                sequence: self.sequence,
                index: index as u32,
                event,
            })
            .collect()
    }
}

fn read_only(body: ResponseBody) -> Result<Applied<ResponseBody>, EngineError> {
    Ok(Applied {
        response: body,
        events: Vec::new(),
    })
}

/// Log a user-facing rejection
fn reject(err: EngineError) -> EngineError {
    if !err.is_fatal() {
        warn!(error = %err, "request rejected");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use types::order::OrderStatus;

    fn market() -> MarketId {
        MarketId::new("BTC/USDT")
    }

    fn btc() -> AssetId {
        AssetId::new("BTC")
    }

    fn usdt() -> AssetId {
        AssetId::new("USDT")
    }

    fn amount(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(&[MarketConfig::new(market(), Price::from_u64(1000))])
    }

    fn funded(engine: &mut MatchingEngine, asset: AssetId, value: u64) -> UserId {
        let user = UserId::new();
        engine.credit_funds(user, &asset, Amount::from_u64(value)).unwrap();
        user
    }

    fn limit(
        engine: &mut MatchingEngine,
        user: UserId,
        side: Side,
        price: u64,
        qty: u64,
    ) -> OrderAck {
        engine
            .create_order(
                user,
                &market(),
                side,
                OrderKind::Limit,
                Some(Price::from_u64(price)),
                Quantity::from_u64(qty),
            )
            .unwrap()
            .response
    }

    #[test]
    fn test_full_match_settles_both_users() {
        let mut engine = engine();
        let seller = funded(&mut engine, btc(), 5);
        let buyer = funded(&mut engine, usdt(), 500);

        limit(&mut engine, seller, Side::Sell, 100, 5);
        let ack = limit(&mut engine, buyer, Side::Buy, 100, 5);

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.fills.len(), 1);
        assert_eq!(ack.average_price, Some(Price::from_u64(100)));
        assert_eq!(engine.get_balance(&buyer, &btc()), Balance::new(amount("5")));
        assert_eq!(engine.get_balance(&buyer, &usdt()), Balance::default());
        assert_eq!(engine.get_balance(&seller, &usdt()), Balance::new(amount("500")));
        assert_eq!(engine.get_balance(&seller, &btc()), Balance::default());
        assert_eq!(engine.resting_order_count(), 0);
    }

    #[test]
    fn test_price_improvement_released_to_buyer() {
        let mut engine = engine();
        let seller = funded(&mut engine, btc(), 5);
        let buyer = funded(&mut engine, usdt(), 808);

        limit(&mut engine, seller, Side::Sell, 100, 5);
        let ack = limit(&mut engine, buyer, Side::Buy, 101, 8);

        assert_eq!(ack.status, OrderStatus::PartiallyFilled);
        assert_eq!(ack.filled_quantity, Quantity::from_u64(5));
        assert_eq!(ack.remaining_quantity, Quantity::from_u64(3));

        let balance = engine.get_balance(&buyer, &usdt());
        assert_eq!(balance.locked, amount("303"));
        assert_eq!(balance.available, amount("5"));
        engine.verify_reservations().unwrap();
    }

    #[test]
    fn test_insufficient_balance_changes_nothing() {
        let mut engine = engine();
        let buyer = funded(&mut engine, usdt(), 50);
        let before = engine.state();

        let err = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Limit,
                Some(Price::from_u64(10)),
                Quantity::from_u64(10),
            )
            .unwrap_err();

        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_invalid_orders_rejected_before_mutation() {
        let mut engine = engine();
        let user = funded(&mut engine, usdt(), 1000);
        let before = engine.state();

        let unknown = MarketId::new("ETH/USDT");
        let cases = [
            (market(), OrderKind::Limit, None, Quantity::from_u64(1)),
            (market(), OrderKind::Limit, Some(Price::zero()), Quantity::from_u64(1)),
            (market(), OrderKind::Limit, Some(Price::from_u64(1)), Quantity::zero()),
            (unknown, OrderKind::Limit, Some(Price::from_u64(1)), Quantity::from_u64(1)),
        ];
        for (market, kind, price, quantity) in cases {
            let err = engine
                .create_order(user, &market, Side::Buy, kind, price, quantity)
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidOrder(_)), "{err}");
        }
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_market_buy_reserves_cap_and_releases_rest() {
        let mut engine = engine();
        let seller = funded(&mut engine, btc(), 1);
        let buyer = funded(&mut engine, usdt(), 2000);
        limit(&mut engine, seller, Side::Sell, 900, 1);

        let ack = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Market,
                None,
                Quantity::from_u64(2),
            )
            .unwrap()
            .response;

        assert_eq!(ack.status, OrderStatus::Cancelled);
        assert_eq!(ack.filled_quantity, Quantity::from_u64(1));
        assert_eq!(engine.get_balance(&buyer, &usdt()), Balance::new(amount("1100")));
        assert_eq!(engine.get_balance(&buyer, &btc()), Balance::new(amount("1")));
    }

    #[test]
    fn test_market_buy_without_cap_funds_is_rejected() {
        let mut engine = engine();
        let buyer = funded(&mut engine, usdt(), 999);

        let err = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Market,
                None,
                Quantity::from_u64(1),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_cancel_releases_and_second_cancel_not_found() {
        let mut engine = engine();
        let buyer = funded(&mut engine, usdt(), 1000);
        let ack = limit(&mut engine, buyer, Side::Buy, 100, 4);

        let cancelled = engine.cancel_order(&ack.order_id, &market()).unwrap();
        assert_eq!(cancelled.response.released_quantity, Quantity::from_u64(4));
        assert_eq!(cancelled.response.released_amount, amount("400"));
        assert_eq!(engine.get_balance(&buyer, &usdt()), Balance::new(amount("1000")));
        assert!(matches!(
            cancelled.events[0].event,
            EngineEvent::OrderStatusChanged { status: OrderStatus::Cancelled, .. }
        ));

        let before = engine.state();
        let err = engine.cancel_order(&ack.order_id, &market()).unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound { .. }));
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_events_for_match() {
        let mut engine = engine();
        let seller = funded(&mut engine, btc(), 5);
        let buyer = funded(&mut engine, usdt(), 1000);
        limit(&mut engine, seller, Side::Sell, 100, 5);

        let applied = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Limit,
                Some(Price::from_u64(100)),
                Quantity::from_u64(2),
            )
            .unwrap();

        let kinds: Vec<&str> = applied
            .events
            .iter()
            .map(|e| match e.event {
                EngineEvent::TradeExecuted { .. } => "trade",
                EngineEvent::OrderStatusChanged { .. } => "status",
                EngineEvent::DepthChanged { .. } => "depth",
            })
            .collect();
        assert_eq!(kinds, vec!["trade", "status", "status", "depth"]);
        assert!(applied.events.iter().all(|e| e.sequence == engine.sequence()));
        assert_eq!(
            applied.events[3].event,
            EngineEvent::DepthChanged {
                market: market(),
                side: Side::Sell,
                price: Price::from_u64(100),
                quantity: Quantity::from_u64(3),
            }
        );
    }

    #[test]
    fn test_reads_do_not_advance_sequence() {
        let mut engine = engine();
        let user = funded(&mut engine, usdt(), 100);
        let sequence = engine.sequence();

        engine
            .handle(Request::GetDepth {
                market: market(),
                levels: 10,
            })
            .unwrap();
        engine
            .handle(Request::GetBalance {
                user_id: user,
                asset: usdt(),
            })
            .unwrap();

        assert_eq!(engine.sequence(), sequence);
    }

    #[test]
    fn test_state_restore_round_trip() {
        let mut engine = engine();
        let seller = funded(&mut engine, btc(), 10);
        let buyer = funded(&mut engine, usdt(), 10_000);
        limit(&mut engine, seller, Side::Sell, 101, 3);
        limit(&mut engine, seller, Side::Sell, 102, 3);
        limit(&mut engine, buyer, Side::Buy, 99, 4);

        let markets = [MarketConfig::new(market(), Price::from_u64(1000))];
        let restored = MatchingEngine::restore(&markets, engine.state()).unwrap();

        assert_eq!(restored.state(), engine.state());
        assert_eq!(restored.sequence(), engine.sequence());
    }

    #[test]
    fn test_restore_rejects_unbacked_lock() {
        let mut engine = engine();
        let buyer = funded(&mut engine, usdt(), 1000);
        limit(&mut engine, buyer, Side::Buy, 100, 2);

        let mut state = engine.state();
        state.books.clear();

        let markets = [MarketConfig::new(market(), Price::from_u64(1000))];
        let err = MatchingEngine::restore(&markets, state).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_restore_rejects_unconfigured_market() {
        let engine = engine();
        let mut state = engine.state();
        state
            .books
            .insert(MarketId::new("ETH/USDT"), persistence::BookState::default());

        let markets = [MarketConfig::new(market(), Price::from_u64(1000))];
        assert!(MatchingEngine::restore(&markets, state).is_err());
    }

    #[test]
    fn test_halted_engine_refuses_writes_but_serves_reads() {
        let mut engine = engine();
        let user = funded(&mut engine, usdt(), 100);

        let violation = engine.ledger.release(user, &usdt(), amount("1"));
        assert!(engine.guard(violation).is_err());
        assert!(engine.is_halted());

        let err = engine.credit_funds(user, &usdt(), amount("1")).unwrap_err();
        assert!(matches!(err, EngineError::EngineHalted(_)));
        assert_eq!(engine.get_balance(&user, &usdt()).available, amount("100"));
        assert!(engine.get_depth(&market(), 5).is_ok());
    }

    #[test]
    fn test_order_value_past_maximum_is_rejected_without_halting() {
        let mut engine = engine();
        let price = Price::from_str("12345678.1234567").unwrap();
        let seller = UserId::new();
        engine.credit_funds(seller, &btc(), amount("0.12345671")).unwrap();
        let buyer = funded(&mut engine, usdt(), 1_000_000_000_000);

        let ask = engine
            .create_order(
                seller,
                &market(),
                Side::Sell,
                OrderKind::Limit,
                Some(price),
                Quantity::from_str("0.12345671").unwrap(),
            )
            .unwrap()
            .response;
        assert_eq!(ask.status, OrderStatus::Open);
        let sequence = engine.sequence();
        let ledger = engine.ledger().clone();

        let err = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Limit,
                Some(price),
                Quantity::from_str("98765432.9876543").unwrap(),
            )
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidOrder(_)));
        assert!(!engine.is_halted());
        assert_eq!(engine.sequence(), sequence);
        assert_eq!(engine.ledger(), &ledger);
        assert_eq!(engine.resting_order_count(), 1);

        // a buy that fits the bound still takes the ask at full scale
        let ack = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Limit,
                Some(price),
                Quantity::from_u64(80_000),
            )
            .unwrap()
            .response;
        assert_eq!(ack.filled_quantity, Quantity::from_str("0.12345671").unwrap());
        assert_eq!(ack.average_price, Some(price));
        engine.verify_reservations().unwrap();
    }

    #[test]
    fn test_market_buy_value_past_maximum_is_rejected() {
        let mut engine = engine();
        let buyer = funded(&mut engine, usdt(), 1_000_000_000_000);

        // the cap of 1000 times 10^10 is past the bound
        let err = engine
            .create_order(
                buyer,
                &market(),
                Side::Buy,
                OrderKind::Market,
                None,
                Quantity::from_u64(10_000_000_000),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder(_)));
        assert_eq!(engine.get_balance(&buyer, &usdt()).locked, Amount::zero());
        assert!(!engine.is_halted());
    }
}
