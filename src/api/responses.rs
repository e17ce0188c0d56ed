use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::{Order, OrderStatus, PaymentConfirmation};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Webhook acknowledgement. Identical for first and duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub received: bool,
    pub quote_id: String,
    pub order_id: Option<Uuid>,
    /// `confirmed`, or `processing` while the first delivery is still in flight.
    pub status: String,
}

impl From<PaymentConfirmation> for ConfirmationResponse {
    fn from(confirmation: PaymentConfirmation) -> Self {
        let status = if confirmation.order.is_some() { "confirmed" } else { "processing" };
        Self {
            received: true,
            quote_id: confirmation.quote_id,
            order_id: confirmation.order.map(|o| o.id),
            status: status.to_string(),
        }
    }
}

/// Order response DTO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub quote_id: String,
    pub payment_intent_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            quote_id: order.quote_id,
            payment_intent_id: order.payment_intent_id,
            amount_minor: order.amount_minor,
            currency: order.currency,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

/// A customer's orders and whether they came from the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerOrdersResponse {
    pub orders: Vec<OrderResponse>,
    pub cached: bool,
}
