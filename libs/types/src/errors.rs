//! Error types for the matching engine
//!
//! Comprehensive error taxonomy using thiserror

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::numeric::NumericError;

/// Top-level engine error
///
/// Every variant except `InvariantViolation` and `EngineHalted` is a
/// recoverable, user-facing rejection returned before any state mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Insufficient balance for asset {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: String,
        available: String,
    },

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Internal precondition failed; fatal for the engine instance
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Engine halted after invariant violation: {0}")]
    EngineHalted(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            EngineError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
            EngineError::InvalidOrder(_) => ErrorCode::InvalidOrder,
            EngineError::InvariantViolation(_) => ErrorCode::InvariantViolation,
            EngineError::EngineHalted(_) => ErrorCode::EngineHalted,
        }
    }

    /// Whether this error must stop the engine from accepting writes
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvariantViolation(_))
    }
}

impl From<NumericError> for EngineError {
    fn from(err: NumericError) -> Self {
        EngineError::InvalidOrder(err.to_string())
    }
}

/// Stable error code carried on outbound responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    OrderNotFound,
    InvalidOrder,
    InvariantViolation,
    EngineHalted,
}

/// Balance record errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Insufficient available balance: required {required}, available {available}")]
    InsufficientAvailable { required: String, available: String },

    #[error("Insufficient locked balance: required {required}, locked {locked}")]
    InsufficientLocked { required: String, locked: String },

    #[error("Balance would exceed the maximum value: {balance} + {amount}")]
    Overflow { balance: String, amount: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_order_display() {
        let err = EngineError::InvalidOrder("quantity must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid order: quantity must be positive");
        assert_eq!(err.code(), ErrorCode::InvalidOrder);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_insufficient_balance_display() {
        let err = EngineError::InsufficientBalance {
            asset: "BTC".to_string(),
            required: "1.5".to_string(),
            available: "1.0".to_string(),
        };
        assert!(err.to_string().contains("BTC"));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(EngineError::InvariantViolation("x".into()).is_fatal());
        assert!(!EngineError::EngineHalted("x".into()).is_fatal());
    }

    #[test]
    fn test_numeric_error_becomes_invalid_order() {
        let err: EngineError = NumericError::Negative("-1".into()).into();
        assert_eq!(err.code(), ErrorCode::InvalidOrder);
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InsufficientBalance).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_BALANCE\"");
    }
}
