use crate::cache::{Cached, ReadThroughCache};
use crate::error::{AppError, Result};
use crate::idempotency::{create_request_fingerprint, DedupDecision, DedupStore, FailurePolicy, FingerprintFields};
use crate::observability::{mask_email, LatencyTimer};
use crate::orders::gateway::{PaymentGateway, PaymentIntent};
use crate::orders::model::{NewOrder, Order};
use crate::orders::notifier::{Notifier, TracingNotifier};
use crate::orders::repository::OrderRepository;
use crate::reliability::{with_retry, with_tier_timeout, RetryPolicy, TimeoutBudget, TimeoutTier};
use crate::tasks::TaskRunner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const PAYMENT_CONFIRMED_LABEL: &str = "payment_confirmed";
const ORDER_CONFIRMATION_LABEL: &str = "order_confirmation";

/// A payment-confirmed notification from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub quote_id: String,
    pub payment_intent_id: String,
    pub customer_email: String,
}

/// Result of handling a confirmation. Duplicate deliveries get the same
/// answer as the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub quote_id: String,
    /// None when a duplicate arrives before the first delivery stored its order.
    pub order: Option<Order>,
    pub duplicate: bool,
    pub decision: DedupDecision,
}

/// Cache key for a customer's order list.
pub fn customer_orders_cache_key(customer_email: &str) -> String {
    format!("orders:customer:{}", customer_email.to_lowercase())
}

/// Turns confirmed payments into orders, at most once per quote.
pub struct CheckoutService {
    dedup: Arc<DedupStore>,
    cache: Arc<ReadThroughCache>,
    orders: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    tasks: TaskRunner,
    retry: RetryPolicy,
    timeouts: TimeoutBudget,
    dedup_policy: FailurePolicy,
}

impl CheckoutService {
    pub fn new(
        dedup: Arc<DedupStore>,
        cache: Arc<ReadThroughCache>,
        orders: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        tasks: TaskRunner,
    ) -> Self {
        let dedup_policy = dedup.default_policy();
        Self {
            dedup,
            cache,
            orders,
            gateway,
            notifier: Arc::new(TracingNotifier),
            tasks,
            retry: RetryPolicy::default(),
            timeouts: TimeoutBudget::default(),
            dedup_policy,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutBudget) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the dedup failure policy for this call site.
    pub fn with_dedup_policy(mut self, policy: FailurePolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    pub fn orders(&self) -> Arc<dyn OrderRepository> {
        Arc::clone(&self.orders)
    }

    /// Handles one delivery of a payment confirmation.
    pub async fn confirm_payment(&self, request: ConfirmPayment) -> Result<PaymentConfirmation> {
        let fingerprint = create_request_fingerprint(
            &FingerprintFields::new()
                .with("quoteId", &request.quote_id)
                .with("paymentIntentId", &request.payment_intent_id),
        )?;

        let decision = self
            .dedup
            .check_and_mark_with_policy(&fingerprint, PAYMENT_CONFIRMED_LABEL, self.dedup.default_ttl(), self.dedup_policy)
            .await;

        if !decision.should_proceed() {
            let order = self.find_order(&request.quote_id).await?;
            return Ok(PaymentConfirmation {
                quote_id: request.quote_id,
                order,
                duplicate: true,
                decision,
            });
        }

        match self.process(&request).await {
            Ok(order) => Ok(PaymentConfirmation {
                quote_id: request.quote_id,
                order: Some(order),
                duplicate: false,
                decision,
            }),
            Err(e) => {
                // Redelivery is safe: the order upsert is keyed on quote id.
                if let Err(release_err) = self.dedup.release(&fingerprint, PAYMENT_CONFIRMED_LABEL).await {
                    tracing::warn!(
                        quote_id = %request.quote_id,
                        error = %release_err,
                        "Failed to release dedup mark after processing failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process(&self, request: &ConfirmPayment) -> Result<Order> {
        let timer = LatencyTimer::new();
        let intent = self.verify_payment(&request.payment_intent_id).await?;

        if !intent.is_succeeded() {
            return Err(AppError::Validation(format!(
                "Payment intent '{}' has status '{}'",
                intent.id, intent.status
            )));
        }
        // One payment pays for exactly one quote.
        match intent.quote_id() {
            None => {
                return Err(AppError::Validation(format!(
                    "Payment intent '{}' is not linked to a quote",
                    intent.id
                )))
            }
            Some(quote_id) if quote_id != request.quote_id => {
                return Err(AppError::Conflict(format!(
                    "Payment intent '{}' belongs to quote '{}', not '{}'",
                    intent.id, quote_id, request.quote_id
                )))
            }
            Some(_) => {}
        }

        let new_order = NewOrder {
            quote_id: request.quote_id.clone(),
            payment_intent_id: intent.id.clone(),
            customer_email: request.customer_email.to_lowercase(),
            amount_minor: intent.amount,
            currency: intent.currency.to_uppercase(),
        };

        // Safe to retry: the upsert is keyed on the unique quote id.
        let (order, created) = with_retry("orders.upsert_for_quote", &self.retry, || {
            let orders = Arc::clone(&self.orders);
            let new_order = new_order.clone();
            with_tier_timeout(
                async move { orders.upsert_for_quote(new_order).await },
                TimeoutTier::Database,
                &self.timeouts,
                "orders.upsert_for_quote",
            )
        })
        .await?;

        let cache_key = customer_orders_cache_key(&order.customer_email);
        if let Err(e) = self.cache.invalidate(&cache_key).await {
            tracing::warn!(key = %cache_key, error = %e, "Cache invalidation failed after order write");
        }

        self.notify_once(&order, created).await;

        tracing::info!(
            order_id = %order.id,
            quote_id = %order.quote_id,
            customer = %mask_email(&order.customer_email),
            created,
            duration_ms = timer.elapsed_ms(),
            "Payment confirmed"
        );

        Ok(order)
    }

    /// Sends the confirmation notice unless one was already recorded for the
    /// order. A write that committed behind a timeout comes back with
    /// `created == false`, so the mark, not the flag, decides.
    async fn notify_once(&self, order: &Order, created: bool) {
        let fingerprint =
            match create_request_fingerprint(&FingerprintFields::new().with("orderId", order.id.to_string())) {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "Cannot fingerprint order confirmation");
                    return;
                }
            };

        // A new order always gets its notice; an existing one only when the store can vouch it was never sent.
        let policy = if created {
            FailurePolicy::FailOpen
        } else {
            FailurePolicy::FailClosed
        };
        let decision = self
            .dedup
            .check_and_mark_with_policy(&fingerprint, ORDER_CONFIRMATION_LABEL, self.dedup.default_ttl(), policy)
            .await;
        if !decision.should_proceed() {
            return;
        }

        let notifier = Arc::clone(&self.notifier);
        let confirmed = order.clone();
        self.tasks
            .spawn(ORDER_CONFIRMATION_LABEL, async move { notifier.order_confirmed(&confirmed).await });
    }

    async fn verify_payment(&self, payment_intent_id: &str) -> Result<PaymentIntent> {
        // Safe to retry: a read.
        with_retry("payments.retrieve_intent", &self.retry, || {
            let gateway = Arc::clone(&self.gateway);
            let id = payment_intent_id.to_string();
            with_tier_timeout(
                async move { gateway.retrieve_payment_intent(&id).await },
                TimeoutTier::ExternalApi,
                &self.timeouts,
                "payments.retrieve_intent",
            )
        })
        .await
    }

    async fn find_order(&self, quote_id: &str) -> Result<Option<Order>> {
        // Safe to retry: a read.
        with_retry("orders.find_by_quote", &self.retry, || {
            let orders = Arc::clone(&self.orders);
            let quote_id = quote_id.to_string();
            with_tier_timeout(
                async move { orders.find_by_quote(&quote_id).await },
                TimeoutTier::Database,
                &self.timeouts,
                "orders.find_by_quote",
            )
        })
        .await
    }

    /// A customer's orders, newest first, served through the cache.
    pub async fn orders_for_customer(&self, customer_email: &str) -> Result<Cached<Vec<Order>>> {
        let key = customer_orders_cache_key(customer_email);
        let email = customer_email.to_lowercase();

        self.cache
            .wrap(
                &key,
                || {
                    // Safe to retry: a read.
                    with_retry("orders.list_for_customer", &self.retry, move || {
                        let orders = Arc::clone(&self.orders);
                        let email = email.clone();
                        with_tier_timeout(
                            async move { orders.list_for_customer(&email).await },
                            TimeoutTier::Database,
                            &self.timeouts,
                            "orders.list_for_customer",
                        )
                    })
                },
                self.cache.default_ttl(),
            )
            .await
    }
}
