use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use crate::orders::model::{NewOrder, Order};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence for orders. `quote_id` is the business key: the data layer
/// guarantees at most one order per quote regardless of how many times a
/// confirmation is delivered.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts the order, or returns the existing one for the same quote.
    /// The flag is true when a row was created.
    async fn upsert_for_quote(&self, order: NewOrder) -> Result<(Order, bool)>;

    async fn find_by_quote(&self, quote_id: &str) -> Result<Option<Order>>;

    /// Newest first.
    async fn list_for_customer(&self, customer_email: &str) -> Result<Vec<Order>>;

    async fn ping(&self) -> Result<()>;
}

/// Postgres-backed order repository.
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn upsert_for_quote(&self, order: NewOrder) -> Result<(Order, bool)> {
        let timer = LatencyTimer::new();
        let candidate = order.into_order();

        // The no-op update makes RETURNING yield the existing row on conflict.
        let result = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (id, quote_id, payment_intent_id, customer_email, amount_minor, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (quote_id) DO UPDATE SET quote_id = orders.quote_id
            RETURNING id, quote_id, payment_intent_id, customer_email, amount_minor, currency, status, created_at
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.quote_id)
        .bind(&candidate.payment_intent_id)
        .bind(&candidate.customer_email)
        .bind(candidate.amount_minor)
        .bind(&candidate.currency)
        .bind(candidate.status)
        .bind(candidate.created_at)
        .fetch_one(&self.pool)
        .await;

        get_metrics().record_db_query("order_upsert", timer.elapsed_ms(), result.is_ok());
        let row = match result {
            Ok(row) => row,
            Err(e) if violates_payment_intent_unique(&e) => {
                // A concurrent insert for the same quote can trip the intent index first.
                return match self.find_by_quote(&candidate.quote_id).await? {
                    Some(existing) if existing.payment_intent_id == candidate.payment_intent_id => {
                        get_metrics().record_order_upsert(false, timer.elapsed_ms());
                        Ok((existing, false))
                    }
                    _ => Err(payment_intent_taken(&candidate.payment_intent_id)),
                };
            }
            Err(e) => return Err(AppError::Database(e)),
        };

        let created = row.id == candidate.id;
        get_metrics().record_order_upsert(created, timer.elapsed_ms());
        Ok((row, created))
    }

    async fn find_by_quote(&self, quote_id: &str) -> Result<Option<Order>> {
        let timer = LatencyTimer::new();
        let result = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, quote_id, payment_intent_id, customer_email, amount_minor, currency, status, created_at
            FROM orders
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await;

        get_metrics().record_db_query("order_find_by_quote", timer.elapsed_ms(), result.is_ok());
        result.map_err(AppError::Database)
    }

    async fn list_for_customer(&self, customer_email: &str) -> Result<Vec<Order>> {
        let timer = LatencyTimer::new();
        let result = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, quote_id, payment_intent_id, customer_email, amount_minor, currency, status, created_at
            FROM orders
            WHERE customer_email = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_email)
        .fetch_all(&self.pool)
        .await;

        get_metrics().record_db_query("order_list_for_customer", timer.elapsed_ms(), result.is_ok());
        result.map_err(AppError::Database)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}

const PAYMENT_INTENT_UNIQUE: &str = "orders_payment_intent_id_unique";

fn payment_intent_taken(payment_intent_id: &str) -> AppError {
    AppError::Conflict(format!(
        "Payment intent '{}' already confirmed another quote",
        payment_intent_id
    ))
}

fn violates_payment_intent_unique(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.constraint())
        .is_some_and(|constraint| constraint == PAYMENT_INTENT_UNIQUE)
}

/// In-process order repository with the same uniqueness guarantees.
#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn upsert_for_quote(&self, order: NewOrder) -> Result<(Order, bool)> {
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.get(&order.quote_id) {
            get_metrics().record_order_upsert(false, 0.0);
            return Ok((existing.clone(), false));
        }
        if orders.values().any(|o| o.payment_intent_id == order.payment_intent_id) {
            return Err(payment_intent_taken(&order.payment_intent_id));
        }

        let order = order.into_order();
        orders.insert(order.quote_id.clone(), order.clone());
        get_metrics().record_order_upsert(true, 0.0);
        Ok((order, true))
    }

    async fn find_by_quote(&self, quote_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(quote_id).cloned())
    }

    async fn list_for_customer(&self, customer_email: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.customer_email == customer_email)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
