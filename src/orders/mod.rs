//! Reference payment-confirmation flow built on the reliability components.

pub mod gateway;
pub mod model;
pub mod notifier;
pub mod repository;
pub mod service;

pub use gateway::{HttpPaymentGateway, PaymentGateway, PaymentIntent};
pub use model::{NewOrder, Order, OrderStatus};
pub use notifier::{Notifier, TracingNotifier};
pub use repository::{MemoryOrderRepository, OrderRepository, PostgresOrderRepository};
pub use service::{customer_orders_cache_key, CheckoutService, ConfirmPayment, PaymentConfirmation};
