mod common;

use async_trait::async_trait;
use common::{fast_retry, short_timeouts, unreachable_store, GatewayScript, RecordingNotifier, TestHarness};
use request_reliability::error::{AppError, Result};
use request_reliability::idempotency::{DedupDecision, FailurePolicy};
use request_reliability::orders::{
    CheckoutService, ConfirmPayment, MemoryOrderRepository, NewOrder, Order, OrderRepository,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn confirm(quote: &str, intent: &str) -> ConfirmPayment {
    ConfirmPayment {
        quote_id: quote.to_string(),
        payment_intent_id: intent.to_string(),
        customer_email: "alice@example.com".to_string(),
    }
}

#[tokio::test]
async fn test_duplicate_webhook_creates_one_order() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 4999);
    let service = harness.service();

    let first = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.decision, DedupDecision::Skip);
    assert_eq!(first.order.as_ref().map(|o| o.id), second.order.as_ref().map(|o| o.id));

    assert_eq!(harness.orders.count().await, 1);
    assert_eq!(harness.gateway.calls(), 1);
}

#[tokio::test]
async fn test_order_uses_provider_amount() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI2", "Q2", 1250);

    let confirmation = harness.service().confirm_payment(confirm("Q2", "PI2")).await.unwrap();
    let order = confirmation.order.unwrap();

    assert_eq!(order.amount_minor, 1250);
    assert_eq!(order.currency, "USD");
}

#[tokio::test]
async fn test_store_outage_still_creates_exactly_one_order() {
    let harness = TestHarness::with_store(Arc::new(unreachable_store()));
    harness.gateway.succeed("PI1", "Q1", 4999);
    let service = harness.service();

    let first = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    let second = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();

    assert_eq!(first.decision, DedupDecision::ProceedDegraded);
    assert_eq!(second.decision, DedupDecision::ProceedDegraded);
    assert_eq!(first.order.unwrap().id, second.order.unwrap().id);
    assert_eq!(harness.orders.count().await, 1);
}

#[tokio::test]
async fn test_fail_closed_call_site_skips_during_outage() {
    let harness = TestHarness::with_store(Arc::new(unreachable_store()));
    harness.gateway.succeed("PI1", "Q1", 4999);
    let service = harness.service().with_dedup_policy(FailurePolicy::FailClosed);

    let result = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();

    assert!(result.duplicate);
    assert!(result.order.is_none());
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn test_gateway_timeout_is_reported_and_mark_released() {
    let harness = TestHarness::new();
    harness.gateway.script("PI1", GatewayScript::Hang);
    let service = harness.service();

    let err = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(harness.gateway.calls(), 3);
    assert_eq!(harness.orders.count().await, 0);

    // The provider redelivers once verification works again.
    harness.gateway.succeed("PI1", "Q1", 4999);
    let retried = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    assert!(!retried.duplicate);
    assert_eq!(harness.orders.count().await, 1);
}

#[tokio::test]
async fn test_transient_gateway_error_is_retried() {
    let harness = TestHarness::new();
    harness.gateway.script(
        "PI1",
        GatewayScript::Fail(|| AppError::Upstream {
            service: "payments".to_string(),
            status: Some(503),
            message: "unavailable".to_string(),
            transient: true,
        }),
    );

    let err = harness.service().confirm_payment(confirm("Q1", "PI1")).await.unwrap_err();

    assert!(matches!(err, AppError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(harness.gateway.calls(), 3);
}

#[tokio::test]
async fn test_unknown_intent_is_not_retried() {
    let harness = TestHarness::new();

    let err = harness.service().confirm_payment(confirm("Q1", "PI-missing")).await.unwrap_err();

    assert!(matches!(err, AppError::Upstream { status: Some(404), .. }));
    assert_eq!(harness.gateway.calls(), 1);
}

#[tokio::test]
async fn test_unsucceeded_intent_is_rejected() {
    let harness = TestHarness::new();
    harness.gateway.script("PI1", GatewayScript::Status("requires_payment_method".to_string()));

    let err = harness.service().confirm_payment(confirm("Q1", "PI1")).await.unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(harness.orders.count().await, 0);
}

#[tokio::test]
async fn test_intent_for_other_quote_is_a_conflict() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q-other", 4999);

    let err = harness.service().confirm_payment(confirm("Q1", "PI1")).await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_intent_without_quote_confirms_nothing() {
    let harness = TestHarness::new();
    harness.gateway.script("PI1", GatewayScript::Unlinked { amount: 4999 });
    let service = harness.service();

    for quote in ["Q1", "Q2", "Q3"] {
        let err = service.confirm_payment(confirm(quote, "PI1")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{}: {}", quote, err);
    }

    assert_eq!(harness.orders.count().await, 0);
}

#[tokio::test]
async fn test_one_intent_cannot_pay_for_two_quotes() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 4999);
    let service = harness.service();

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    let err = service.confirm_payment(confirm("Q2", "PI1")).await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(harness.orders.count().await, 1);
    assert!(harness.orders.find_by_quote("Q2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_confirmation_invalidates_customer_orders() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 1000);
    harness.gateway.succeed("PI2", "Q2", 2000);
    let service = harness.service();

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    let before = service.orders_for_customer("alice@example.com").await.unwrap();
    assert_eq!(before.data.len(), 1);

    let cached = service.orders_for_customer("alice@example.com").await.unwrap();
    assert!(cached.cached);

    service.confirm_payment(confirm("Q2", "PI2")).await.unwrap();
    let after = service.orders_for_customer("alice@example.com").await.unwrap();
    assert!(!after.cached);
    assert_eq!(after.data.len(), 2);
}

#[tokio::test]
async fn test_notification_sent_once_per_order() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 1000);
    let notifier = Arc::new(RecordingNotifier::default());
    let service = harness.service().with_notifier(notifier.clone());

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_notification_is_dead_lettered() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 1000);
    let mut dead_letters = harness.tasks.dead_letters().unwrap();
    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    });
    let service = harness.service().with_notifier(notifier);

    let confirmation = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    assert!(confirmation.order.is_some());

    let letter = tokio::time::timeout(Duration::from_secs(1), dead_letters.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(letter.task, "order_confirmation");
    assert!(letter.error.contains("mailer unavailable"));
}

#[tokio::test]
async fn test_orders_repository_is_shared() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 1000);
    let service = harness.service();

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();

    let order = service.orders().find_by_quote("Q1").await.unwrap().unwrap();
    assert_eq!(order.payment_intent_id, "PI1");
}

/// Commits the first write, then never answers that call.
struct CommitThenHang {
    inner: Arc<MemoryOrderRepository>,
    hung: AtomicBool,
}

#[async_trait]
impl OrderRepository for CommitThenHang {
    async fn upsert_for_quote(&self, order: NewOrder) -> Result<(Order, bool)> {
        let result = self.inner.upsert_for_quote(order).await?;
        if !self.hung.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(result)
    }

    async fn find_by_quote(&self, quote_id: &str) -> Result<Option<Order>> {
        self.inner.find_by_quote(quote_id).await
    }

    async fn list_for_customer(&self, customer_email: &str) -> Result<Vec<Order>> {
        self.inner.list_for_customer(customer_email).await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_notice_sent_when_write_committed_behind_a_timeout() {
    let harness = TestHarness::new();
    harness.gateway.succeed("PI1", "Q1", 1000);
    let orders = Arc::new(CommitThenHang {
        inner: harness.orders.clone(),
        hung: AtomicBool::new(false),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let service = CheckoutService::new(
        harness.dedup.clone(),
        harness.cache.clone(),
        orders,
        Arc::new(harness.gateway.clone()),
        harness.tasks.clone(),
    )
    .with_retry_policy(fast_retry())
    .with_timeouts(short_timeouts())
    .with_notifier(notifier.clone());

    // First upsert attempt times out after committing; the retry finds the row.
    let confirmation = service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    assert!(confirmation.order.is_some());

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.orders.count().await, 1);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_existing_order_not_renotified_during_store_outage() {
    let harness = TestHarness::with_store(Arc::new(unreachable_store()));
    harness.gateway.succeed("PI1", "Q1", 1000);
    let notifier = Arc::new(RecordingNotifier::default());
    let service = harness.service().with_notifier(notifier.clone());

    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    service.confirm_payment(confirm("Q1", "PI1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.orders.count().await, 1);
    assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
}
