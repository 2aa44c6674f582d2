//! Read-only view over the user's bonus account.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::store::{StoreError, UserStore};

pub struct BalanceManager {
    users: Arc<dyn UserStore>,
}

impl BalanceManager {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Returns `(current, withdrawn)`.
    pub async fn get_balance(&self, user_id: i64) -> Result<(Decimal, Decimal), StoreError> {
        self.users.get_balance(user_id).await
    }
}
