//! Order intake and listing.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::store::{Order, OrderStatus, OrderStore, QueueStatus, StoreError};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order number")]
    InvalidNumber,
    #[error("order belongs to another user")]
    OwnedByAnother,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct OrderManager {
    orders: Arc<dyn OrderStore>,
}

impl OrderManager {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// Registers an order for accrual processing.
    ///
    /// Returns `true` when the order was newly created and queued, `false`
    /// when the same user had already submitted it. A number owned by a
    /// different user is rejected with [`OrderError::OwnedByAnother`].
    pub async fn submit_order(&self, user_id: i64, number: &str) -> Result<bool, OrderError> {
        let number = number.trim();
        validate_order_number(number)?;

        match self.orders.get_order(number).await {
            Ok(existing) => {
                return if existing.user_id == user_id {
                    Ok(false)
                } else {
                    Err(OrderError::OwnedByAnother)
                };
            }
            Err(StoreError::OrderNotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let order = Order {
            number: number.to_string(),
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
            accrual_applied: false,
        };

        if let Err(err) = self.orders.create_order(&order).await {
            return match err {
                StoreError::OrderExists => {
                    // Lost the insert race; resolve ownership against the winner.
                    let existing = self.orders.get_order(number).await?;
                    if existing.user_id == user_id {
                        Ok(false)
                    } else {
                        Err(OrderError::OwnedByAnother)
                    }
                }
                err => Err(err.into()),
            };
        }

        self.orders.upsert_queue(number, QueueStatus::New).await?;
        Ok(true)
    }

    pub async fn list_user_orders(&self, user_id: i64) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_user_orders(user_id).await?)
    }
}

/// Rejects empty, non-digit and Luhn-invalid numbers.
pub fn validate_order_number(number: &str) -> Result<(), OrderError> {
    let trimmed = number.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(OrderError::InvalidNumber);
    }
    if !luhn_valid(trimmed) {
        return Err(OrderError::InvalidNumber);
    }
    Ok(())
}

/// Doubling every second digit from the right (digits over nine reduced by
/// nine), the total must be divisible by ten.
fn luhn_valid(number: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for b in number.bytes().rev() {
        let mut digit = u32::from(b - b'0');
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
    }
    sum % 10 == 0
}
