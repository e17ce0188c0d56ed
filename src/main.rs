use request_reliability::api::{create_router, AppState};
use request_reliability::cache::ReadThroughCache;
use request_reliability::config::Settings;
use request_reliability::idempotency::DedupStore;
use request_reliability::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use request_reliability::orders::{CheckoutService, HttpPaymentGateway, OrderRepository, PostgresOrderRepository};
use request_reliability::reliability::{RetryPolicy, TimeoutBudget};
use request_reliability::store::{RedisStore, SharedStore};
use request_reliability::tasks::TaskRunner;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging and metrics
    init_logging(&LogConfig::from_settings(&settings.application));
    let metrics_handle = init_metrics();
    info!("Configuration loaded");

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    // Shared store. Unreachable Redis only degrades health.
    let redis_client = redis::Client::open(settings.redis.url.as_str())?;
    let store: Arc<dyn SharedStore> = Arc::new(
        RedisStore::new(redis_client, "reliability").with_response_timeout(settings.redis.response_timeout()),
    );
    match store.ping().await {
        Ok(()) => info!("Redis connection established"),
        Err(e) => tracing::warn!(error = %e, "Redis unreachable at startup, running degraded"),
    }

    let timeouts = TimeoutBudget::from(&settings.timeouts);
    let retry = RetryPolicy::from(&settings.retry);

    let dedup = Arc::new(DedupStore::new(store.clone(), &settings.dedup, timeouts.shared_store));
    let cache = Arc::new(ReadThroughCache::new(store.clone(), settings.cache.clone(), timeouts.shared_store));
    let orders: Arc<dyn OrderRepository> = Arc::new(PostgresOrderRepository::new(pool));
    let gateway = Arc::new(HttpPaymentGateway::new(&settings.payments)?);

    let tasks = TaskRunner::new();
    if let Some(mut dead_letters) = tasks.dead_letters() {
        tokio::spawn(async move {
            while let Some(letter) = dead_letters.recv().await {
                tracing::error!(task = %letter.task, error = %letter.error, failed_at = %letter.failed_at, "Dead letter");
            }
        });
    }

    let checkout = Arc::new(
        CheckoutService::new(dedup, cache, orders.clone(), gateway, tasks)
            .with_retry_policy(retry)
            .with_timeouts(timeouts),
    );
    let health_checker = Arc::new(HealthChecker::new(orders, store, timeouts));

    let state = AppState::new(checkout, health_checker).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
