use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an order created from a confirmed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Payment verified, order recorded.
    Confirmed,
    /// Payment later refunded by the provider.
    Refunded,
}

/// An order, unique per quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub quote_id: String,
    pub payment_intent_id: String,
    pub customer_email: String,
    /// Amount in the currency's minor unit (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create an order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub quote_id: String,
    pub payment_intent_id: String,
    pub customer_email: String,
    pub amount_minor: i64,
    pub currency: String,
}

impl NewOrder {
    pub fn into_order(self) -> Order {
        Order {
            id: Uuid::new_v4(),
            quote_id: self.quote_id,
            payment_intent_id: self.payment_intent_id,
            customer_email: self.customer_email,
            amount_minor: self.amount_minor,
            currency: self.currency,
            status: OrderStatus::Confirmed,
            created_at: Utc::now(),
        }
    }
}
