use sqlx::PgPool;
use std::time::Duration;

use crate::engine::{HoldEngine, WebhookEngine};
use crate::error::Error;

/// Spawns the background task that periodically expires due holds and
/// settles stored pending webhooks. Not required for correctness; required
/// for timely release of expired holds and out-of-order settlement.
pub fn spawn_sweeper(pool: PgPool, holds: HoldEngine, webhooks: WebhookEngine, period: Duration) {
    tokio::spawn(async move {
        tracing::info!("Sweeper started, period {:?}", period);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&pool, &holds, &webhooks).await {
                tracing::error!("Sweep cycle failed: {}", e);
            }
        }
    });
}

/// One sweep cycle, mutually excluded across replicas by a named advisory
/// lock held on a dedicated connection for the duration of the run. A
/// crashed holder's lease ends when its connection closes.
pub async fn sweep_once(
    pool: &PgPool,
    holds: &HoldEngine,
    webhooks: &WebhookEngine,
) -> Result<(), Error> {
    let mut conn = pool.acquire().await?;
    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(sweeper_lock_key())
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::from)?;
    if !acquired {
        tracing::debug!("sweep already running on another instance");
        return Ok(());
    }

    let result = run_sweep(holds, webhooks).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(sweeper_lock_key())
        .execute(&mut *conn)
        .await
        .ok();

    result
}

async fn run_sweep(holds: &HoldEngine, webhooks: &WebhookEngine) -> Result<(), Error> {
    let expired = holds.expire_due().await?;
    let drained = webhooks.drain_pending().await?;
    if expired > 0 || drained > 0 {
        tracing::info!(expired, drained, "sweep cycle complete");
    }
    Ok(())
}

fn sweeper_lock_key() -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    "checkout:sweeper".hash(&mut hasher);
    hasher.finish() as i64
}
