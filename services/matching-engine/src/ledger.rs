//! Balance ledger
//!
//! Authoritative available/locked balances per `(user, asset)`. Every
//! operation works on copies of the affected records and commits them only
//! once all of its legs have succeeded, so a failed call changes nothing.
//!
//! The ledger has exactly one caller at a time (the engine step), so it does
//! no locking of its own.

use std::collections::BTreeMap;

use persistence::BalanceRecord;
use types::account::Balance;
use types::errors::{AccountError, EngineError};
use types::ids::{AssetId, UserId};
use types::numeric::{Amount, Price, Quantity};
use types::trade::Fill;

use crate::book::Settlement;

type Key = (UserId, AssetId);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    balances: BTreeMap<Key, Balance>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from snapshot records
    pub fn from_records(records: Vec<BalanceRecord>) -> Result<Self, EngineError> {
        let mut balances = BTreeMap::new();
        for record in records {
            let key = (record.user_id, record.asset);
            if balances.insert(key.clone(), record.balance).is_some() {
                return Err(EngineError::InvariantViolation(format!(
                    "duplicate balance record for user {} asset {}",
                    key.0, key.1
                )));
            }
        }
        Ok(Self { balances })
    }

    /// Snapshot records, ordered by user then asset
    pub fn records(&self) -> Vec<BalanceRecord> {
        self.balances
            .iter()
            .map(|((user_id, asset), balance)| BalanceRecord {
                user_id: *user_id,
                asset: asset.clone(),
                balance: *balance,
            })
            .collect()
    }

    /// Current balance; zero for unknown pairs
    pub fn balance(&self, user: &UserId, asset: &AssetId) -> Balance {
        self.balances
            .get(&(*user, asset.clone()))
            .copied()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &AssetId, &Balance)> {
        self.balances
            .iter()
            .map(|((user, asset), balance)| (user, asset, balance))
    }

    /// Sum of `available + locked` over all users for one asset
    pub fn total(&self, asset: &AssetId) -> Amount {
        self.balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .fold(Amount::zero(), |acc, (_, balance)| acc + balance.total())
    }

    /// Move `amount` from available to locked
    ///
    /// Fails with `InsufficientBalance` when available is short; nothing is
    /// reserved in that case.
    pub fn reserve(
        &mut self,
        user: UserId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        let mut balance = self.balance(&user, asset);
        balance.lock(amount).map_err(|err| match err {
            AccountError::InsufficientAvailable { .. } => EngineError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount.to_string(),
                available: balance.available.to_string(),
            },
            other => EngineError::InvariantViolation(format!(
                "reserve for user {} asset {}: {}",
                user, asset, other
            )),
        })?;
        self.balances.insert((user, asset.clone()), balance);
        Ok(())
    }

    /// Move `amount` from locked back to available
    ///
    /// Releasing more than is locked means the engine's reservation
    /// accounting is broken, so it surfaces as `InvariantViolation`.
    pub fn release(
        &mut self,
        user: UserId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        let mut balance = self.balance(&user, asset);
        balance.unlock(amount).map_err(|err| {
            EngineError::InvariantViolation(format!(
                "release for user {} asset {}: {}",
                user, asset, err
            ))
        })?;
        self.balances.insert((user, asset.clone()), balance);
        Ok(())
    }

    /// Apply all four legs of a trade or none of them
    ///
    /// The buyer pays `price × quantity` quote out of locked and receives
    /// `quantity` base; the seller pays `quantity` base out of locked and
    /// receives the quote. Fees are zero in this core.
    ///
    /// Legs are staged per key so a self-trade sees its own earlier legs.
    pub fn settle(
        &mut self,
        buyer: UserId,
        seller: UserId,
        base: &AssetId,
        quote: &AssetId,
        price: Price,
        quantity: Quantity,
    ) -> Result<(), EngineError> {
        let notional = price.notional(quantity).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "settle notional of {} at {} is out of range",
                quantity, price
            ))
        })?;
        let base_amount = Amount::from(quantity);
        let violation = |who: &str, asset: &AssetId, err: AccountError| {
            EngineError::InvariantViolation(format!("settle {} leg in {}: {}", who, asset, err))
        };

        let mut staged = BTreeMap::new();
        stage(&self.balances, &mut staged, buyer, quote)
            .deduct_locked(notional)
            .map_err(|err| violation("buyer", quote, err))?;
        stage(&self.balances, &mut staged, seller, base)
            .deduct_locked(base_amount)
            .map_err(|err| violation("seller", base, err))?;
        stage(&self.balances, &mut staged, seller, quote)
            .credit(notional)
            .map_err(|err| violation("seller", quote, err))?;
        stage(&self.balances, &mut staged, buyer, base)
            .credit(base_amount)
            .map_err(|err| violation("buyer", base, err))?;

        self.balances.extend(staged);
        Ok(())
    }

    /// Deposit into available; the only operation that creates value
    ///
    /// The asset's total supply across all users stays within
    /// `MAX_VALUE`, which keeps every later settlement credit in range.
    pub fn credit(
        &mut self,
        user: UserId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<Amount, EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidOrder(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        if self.total(asset).checked_add(amount).is_none() {
            return Err(EngineError::InvalidOrder(format!(
                "credit of {} {} would take its supply past the maximum",
                amount, asset
            )));
        }
        let mut balance = self.balance(&user, asset);
        balance
            .credit(amount)
            .map_err(|err| EngineError::InvalidOrder(err.to_string()))?;
        self.balances.insert((user, asset.clone()), balance);
        Ok(balance.available)
    }
}

/// Working copy of one balance, seeded from the committed map on first use
fn stage<'a>(
    balances: &BTreeMap<Key, Balance>,
    staged: &'a mut BTreeMap<Key, Balance>,
    user: UserId,
    asset: &AssetId,
) -> &'a mut Balance {
    let key = (user, asset.clone());
    let current = balances.get(&key).copied().unwrap_or_default();
    staged.entry(key).or_insert(current)
}

impl Settlement for Ledger {
    fn settle_fill(&mut self, fill: &Fill) -> Result<(), EngineError> {
        self.settle(
            fill.buyer(),
            fill.seller(),
            &fill.market.base(),
            &fill.market.quote(),
            fill.price,
            fill.quantity,
        )
    }
}
