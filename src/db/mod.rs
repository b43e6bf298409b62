use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

use crate::error::Error;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Run migrations in order
    let migrations = [
        include_str!("../../migrations/001_create_products.sql"),
        include_str!("../../migrations/002_create_holds.sql"),
        include_str!("../../migrations/003_create_orders.sql"),
        include_str!("../../migrations/004_create_payment_webhooks.sql"),
    ];

    for migration in migrations {
        sqlx::raw_sql(migration).execute(pool).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Retry policy for a transactional operation.
#[derive(Debug, Clone, Copy)]
pub struct TxnPolicy {
    pub max_attempts: u32,
    pub backoff_ms: (u64, u64),
}

impl Default for TxnPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: (10, 50),
        }
    }
}

/// Runs a transactional closure, retrying deadlock-class failures with
/// randomized backoff. The closure owns its begin/commit; a failed attempt
/// rolls back by dropping the transaction. Engines route every transaction
/// through here instead of hand-rolling retry loops.
pub async fn retry_txn<T, F, Fut>(policy: TxnPolicy, f: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempt, "transaction retry budget exhausted: {}", err);
                    return Err(Error::RetriesExhausted(attempt));
                }
                tracing::debug!(attempt, "retrying transaction after conflict: {}", err);
                backoff(policy).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn backoff(policy: TxnPolicy) {
    let (lo, hi) = policy.backoff_ms;
    let ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(lo..=hi.max(lo))
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
