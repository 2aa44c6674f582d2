//! Spending the bonus balance against order numbers.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use super::order::validate_order_number;
use crate::store::{StoreError, Withdrawal, WithdrawalStore};

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("invalid order number")]
    InvalidNumber,
    #[error("withdraw amount must be positive")]
    InvalidAmount,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error(transparent)]
    Store(StoreError),
}

pub struct WithdrawManager {
    withdrawals: Arc<dyn WithdrawalStore>,
}

impl WithdrawManager {
    pub fn new(withdrawals: Arc<dyn WithdrawalStore>) -> Self {
        Self { withdrawals }
    }

    /// Debits `sum` from the user's balance against `order_number`. The
    /// number must pass the Luhn check but does not have to be a submitted
    /// order.
    pub async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), WithdrawError> {
        let order_number = order_number.trim();
        validate_order_number(order_number).map_err(|_| WithdrawError::InvalidNumber)?;
        if sum <= Decimal::ZERO {
            return Err(WithdrawError::InvalidAmount);
        }

        match self.withdrawals.withdraw(user_id, order_number, sum).await {
            Ok(()) => Ok(()),
            Err(StoreError::InsufficientFunds) => Err(WithdrawError::InsufficientFunds),
            Err(err) => Err(WithdrawError::Store(err)),
        }
    }

    pub async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, WithdrawError> {
        self.withdrawals
            .list_withdrawals(user_id)
            .await
            .map_err(WithdrawError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn withdraw_happy_path() {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.seed_user("spender", "hash", Decimal::new(200, 0));
        let manager = WithdrawManager::new(store.clone());

        manager
            .withdraw(user_id, "79927398713", Decimal::new(50, 0))
            .await
            .unwrap();

        assert_eq!(store.balance_of(user_id), Decimal::new(150, 0));
        assert_eq!(store.withdrawn_of(user_id), Decimal::new(50, 0));
        assert_eq!(manager.list_withdrawals(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn withdraw_insufficient_funds() {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.seed_user("spender", "hash", Decimal::new(10, 0));
        let manager = WithdrawManager::new(store.clone());

        let err = manager
            .withdraw(user_id, "79927398713", Decimal::new(20, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InsufficientFunds));
        assert_eq!(store.balance_of(user_id), Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn withdraw_rejects_bad_input() {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.seed_user("spender", "hash", Decimal::new(100, 0));
        let manager = WithdrawManager::new(store);

        let err = manager
            .withdraw(user_id, "12ab", Decimal::new(10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidNumber));

        let err = manager
            .withdraw(user_id, "79927398713", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidAmount));

        let err = manager
            .withdraw(user_id, "79927398713", Decimal::new(-5, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidAmount));
    }
}
