//! Per-asset balance record
//!
//! Invariant: `available >= 0` and `locked >= 0` at all times. Every
//! operation checks its precondition before touching either field, so a
//! failed call leaves the record unchanged.

use crate::errors::AccountError;
use crate::numeric::Amount;
use serde::{Deserialize, Serialize};

/// Balance for a single (user, asset) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    /// Usable for new orders or withdrawal
    pub available: Amount,
    /// Reserved against open orders
    pub locked: Amount,
}

impl Balance {
    pub fn new(available: Amount) -> Self {
        Self {
            available,
            locked: Amount::zero(),
        }
    }

    pub fn total(&self) -> Amount {
        self.available + self.locked
    }

    /// Move `amount` from available to locked
    pub fn lock(&mut self, amount: Amount) -> Result<(), AccountError> {
        let available = self.available.checked_sub(amount).ok_or_else(|| {
            AccountError::InsufficientAvailable {
                required: amount.to_string(),
                available: self.available.to_string(),
            }
        })?;
        let locked = checked_add(self.locked, amount)?;
        self.available = available;
        self.locked = locked;
        Ok(())
    }

    /// Move `amount` from locked back to available
    pub fn unlock(&mut self, amount: Amount) -> Result<(), AccountError> {
        let locked = self.checked_locked_sub(amount)?;
        let available = checked_add(self.available, amount)?;
        self.locked = locked;
        self.available = available;
        Ok(())
    }

    /// Remove `amount` from locked (the leg leaving this balance in a trade)
    pub fn deduct_locked(&mut self, amount: Amount) -> Result<(), AccountError> {
        self.locked = self.checked_locked_sub(amount)?;
        Ok(())
    }

    /// Credit to available balance (deposit, trade proceeds)
    pub fn credit(&mut self, amount: Amount) -> Result<(), AccountError> {
        self.available = checked_add(self.available, amount)?;
        Ok(())
    }

    fn checked_locked_sub(&self, amount: Amount) -> Result<Amount, AccountError> {
        self.locked
            .checked_sub(amount)
            .ok_or_else(|| AccountError::InsufficientLocked {
                required: amount.to_string(),
                locked: self.locked.to_string(),
            })
    }
}

fn checked_add(balance: Amount, amount: Amount) -> Result<Amount, AccountError> {
    balance.checked_add(amount).ok_or_else(|| AccountError::Overflow {
        balance: balance.to_string(),
        amount: amount.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_balance_creation() {
        let balance = Balance::new(Amount::from_u64(10000));
        assert_eq!(balance.available, Amount::from_u64(10000));
        assert_eq!(balance.locked, Amount::zero());
        assert_eq!(balance.total(), Amount::from_u64(10000));
    }

    #[test]
    fn test_balance_lock_and_unlock() {
        let mut balance = Balance::new(Amount::from_u64(10000));
        balance.lock(Amount::from_u64(3000)).unwrap();
        assert_eq!(balance.available, Amount::from_u64(7000));
        assert_eq!(balance.locked, Amount::from_u64(3000));

        balance.unlock(Amount::from_u64(1000)).unwrap();
        assert_eq!(balance.available, Amount::from_u64(8000));
        assert_eq!(balance.locked, Amount::from_u64(2000));
        assert_eq!(balance.total(), Amount::from_u64(10000));
    }

    #[test]
    fn test_balance_deduct() {
        let mut balance = Balance::new(Amount::from_u64(10000));
        balance.lock(Amount::from_u64(3000)).unwrap();
        balance.deduct_locked(Amount::from_u64(1000)).unwrap();

        assert_eq!(balance.total(), Amount::from_u64(9000));
        assert_eq!(balance.locked, Amount::from_u64(2000));
    }

    #[test]
    fn test_overlock_leaves_balance_unchanged() {
        let mut balance = Balance::new(Amount::from_u64(50));
        let err = balance.lock(Amount::from_u64(100)).unwrap_err();
        assert!(matches!(err, AccountError::InsufficientAvailable { .. }));
        assert_eq!(balance, Balance::new(Amount::from_u64(50)));
    }

    #[test]
    fn test_overunlock_leaves_balance_unchanged() {
        let mut balance = Balance::new(Amount::from_u64(50));
        balance.lock(Amount::from_u64(20)).unwrap();
        let before = balance;

        assert!(balance.unlock(Amount::from_u64(21)).is_err());
        assert!(balance.deduct_locked(Amount::from_u64(21)).is_err());
        assert_eq!(balance, before);
    }

    #[test]
    fn test_credit_past_max_value_leaves_balance_unchanged() {
        let mut balance = Balance::new(Amount::from_u64(999_999_999_999));
        balance.credit(Amount::from_u64(1)).unwrap();
        let full = balance;

        let err = balance.credit(Amount::from_str("0.00000001").unwrap()).unwrap_err();
        assert!(matches!(err, AccountError::Overflow { .. }));
        assert_eq!(balance, full);
    }
}
