//! Inbound requests and outbound responses
//!
//! Prices, quantities and amounts travel as decimal strings and are
//! validated into fixed-point values during deserialization.

use serde::{Deserialize, Serialize};
use types::account::Balance;
use types::errors::{EngineError, ErrorCode};
use types::ids::{AssetId, CorrelationId, MarketId, OrderId, UserId};
use types::numeric::{Amount, Price, Quantity};
use types::order::{Order, OrderKind, OrderStatus, Side};
use types::trade::Fill;

use crate::book::Depth;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    CreateOrder {
        user_id: UserId,
        market: MarketId,
        side: Side,
        kind: OrderKind,
        /// Required for limit orders, ignored for market orders
        #[serde(default)]
        price: Option<Price>,
        quantity: Quantity,
    },
    CancelOrder {
        order_id: OrderId,
        market: MarketId,
    },
    GetDepth {
        market: MarketId,
        levels: usize,
    },
    GetOpenOrders {
        user_id: UserId,
        market: MarketId,
    },
    CreditFunds {
        user_id: UserId,
        asset: AssetId,
        amount: Amount,
    },
    GetBalance {
        user_id: UserId,
        asset: AssetId,
    },
    GetOrder {
        order_id: OrderId,
        market: MarketId,
    },
}

impl Request {
    /// Whether the request changes engine state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::CreateOrder { .. } | Request::CancelOrder { .. } | Request::CreditFunds { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateOrder { .. } => "create_order",
            Request::CancelOrder { .. } => "cancel_order",
            Request::GetDepth { .. } => "get_depth",
            Request::GetOpenOrders { .. } => "get_open_orders",
            Request::CreditFunds { .. } => "credit_funds",
            Request::GetBalance { .. } => "get_balance",
            Request::GetOrder { .. } => "get_order",
        }
    }
}

/// Result of `createOrder`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled_quantity: Quantity,
    pub remaining_quantity: Quantity,
    /// Volume-weighted execution price, absent without fills
    pub average_price: Option<Price>,
    pub fills: Vec<Fill>,
}

/// Result of `cancelOrder`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    pub order_id: OrderId,
    /// Quantity that was still open
    pub released_quantity: Quantity,
    /// Funds returned to available
    pub released_amount: Amount,
}

/// Result of `creditFunds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditAck {
    pub user_id: UserId,
    pub asset: AssetId,
    pub new_available: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub asset: AssetId,
    pub available: Amount,
    pub locked: Amount,
}

impl BalanceView {
    pub fn new(user_id: UserId, asset: AssetId, balance: Balance) -> Self {
        Self {
            user_id,
            asset,
            available: balance.available,
            locked: balance.locked,
        }
    }
}

/// Success payloads, one per request type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseBody {
    OrderCreated(OrderAck),
    OrderCancelled(CancelAck),
    Depth(Depth),
    OpenOrders { orders: Vec<Order> },
    FundsCredited(CreditAck),
    Balance(BalanceView),
    Order(Order),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&EngineError> for ErrorPayload {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(ResponseBody),
    Error(ErrorPayload),
}

/// Response routed back to the caller by its correlation token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub correlation: CorrelationId,
    pub outcome: Outcome,
}

impl Response {
    pub fn new(correlation: CorrelationId, result: Result<ResponseBody, EngineError>) -> Self {
        let outcome = match result {
            Ok(body) => Outcome::Ok(body),
            Err(err) => Outcome::Error(ErrorPayload::from(&err)),
        };
        Self { correlation, outcome }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok(_))
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        match &self.outcome {
            Outcome::Ok(body) => Some(body),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.outcome {
            Outcome::Ok(_) => None,
            Outcome::Error(payload) => Some(payload.code),
        }
    }
}

/// Line format read by the binary: `{"correlation": "...", "request": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub correlation: CorrelationId,
    pub request: Request,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_create_order_from_json() {
        let user = UserId::new();
        let json = format!(
            r#"{{"type":"CREATE_ORDER","user_id":"{}","market":"BTC/USDT","side":"BUY","kind":"LIMIT","price":"100.5","quantity":"2"}}"#,
            user
        );
        let request: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(
            request,
            Request::CreateOrder {
                user_id: user,
                market: MarketId::new("BTC/USDT"),
                side: Side::Buy,
                kind: OrderKind::Limit,
                price: Some(Price::from_str("100.5").unwrap()),
                quantity: Quantity::from_u64(2),
            }
        );
        assert!(request.is_mutating());
    }

    #[test]
    fn test_market_order_price_is_optional() {
        let json = format!(
            r#"{{"type":"CREATE_ORDER","user_id":"{}","market":"BTC/USDT","side":"SELL","kind":"MARKET","quantity":"1"}}"#,
            UserId::new()
        );
        let request: Request = serde_json::from_str(&json).unwrap();
        assert!(matches!(request, Request::CreateOrder { price: None, .. }));
    }

    #[test]
    fn test_invalid_decimals_rejected_at_boundary() {
        let negative = format!(
            r#"{{"type":"CREDIT_FUNDS","user_id":"{}","asset":"USDT","amount":"-1"}}"#,
            UserId::new()
        );
        assert!(serde_json::from_str::<Request>(&negative).is_err());

        let too_precise = format!(
            r#"{{"type":"CREATE_ORDER","user_id":"{}","market":"BTC/USDT","side":"SELL","kind":"MARKET","quantity":"0.000000001"}}"#,
            UserId::new()
        );
        assert!(serde_json::from_str::<Request>(&too_precise).is_err());

        let too_large = format!(
            r#"{{"type":"CREATE_ORDER","user_id":"{}","market":"BTC/USDT","side":"BUY","kind":"LIMIT","price":"1000000000000000","quantity":"1"}}"#,
            UserId::new()
        );
        assert!(serde_json::from_str::<Request>(&too_large).is_err());
    }

    #[test]
    fn test_error_response_carries_code() {
        let err = EngineError::OrderNotFound {
            order_id: OrderId::new().to_string(),
        };
        let response = Response::new(CorrelationId::new("c-1"), Err(err));

        assert!(!response.is_ok());
        assert_eq!(response.error_code(), Some(ErrorCode::OrderNotFound));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["correlation"], "c-1");
        assert_eq!(json["outcome"]["error"]["code"], "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_envelope_line() {
        let line = format!(
            r#"{{"correlation":"42","request":{{"type":"GET_BALANCE","user_id":"{}","asset":"BTC"}}}}"#,
            UserId::new()
        );
        let envelope: Envelope = serde_json::from_str(&line).unwrap();
        assert_eq!(envelope.correlation, CorrelationId::new("42"));
        assert_eq!(envelope.request.name(), "get_balance");
    }
}
