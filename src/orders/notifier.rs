use crate::error::Result;
use crate::observability::mask_email;
use crate::orders::model::Order;
use async_trait::async_trait;

/// Best-effort customer notification after an order is confirmed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmed(&self, order: &Order) -> Result<()>;
}

/// Writes the notification to the log instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn order_confirmed(&self, order: &Order) -> Result<()> {
        tracing::info!(
            order_id = %order.id,
            quote_id = %order.quote_id,
            customer = %mask_email(&order.customer_email),
            "Order confirmation sent"
        );
        Ok(())
    }
}
