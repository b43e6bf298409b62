use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::cache::StockCache;
use crate::config::Config;
use crate::db;
use crate::error::Error;
use crate::models::{Hold, HoldStatus, Product};

const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EXPIRE_PAGE_SIZE: i64 = 100;

/// Outcome of converting a locked hold.
pub(crate) enum Conversion {
    Converted(Hold),
    Expired(Hold),
}

/// Creates, releases, converts, and expires holds. The no-oversell gate
/// lives here: admission recomputes availability under the product row lock
/// plus a lock over that product's active holds, never from the cache.
#[derive(Clone)]
pub struct HoldEngine {
    pool: PgPool,
    cache: StockCache,
    config: Arc<Config>,
}

impl HoldEngine {
    pub fn new(pool: PgPool, cache: StockCache, config: Arc<Config>) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    pub async fn create_hold(&self, product_id: i32, quantity: i32) -> Result<Hold, Error> {
        if quantity < 1 || quantity > self.config.max_hold_qty {
            return Err(Error::Validation(format!(
                "qty must be between 1 and {}",
                self.config.max_hold_qty
            )));
        }
        let result = db::retry_txn(self.config.txn_policy(), || {
            self.create_hold_once(product_id, quantity)
        })
        .await
        .map_err(|e| {
            if e.is_lock_timeout() {
                Error::SystemBusy
            } else {
                e
            }
        });
        match &result {
            Ok(hold) => {
                self.cache.invalidate(product_id);
                tracing::debug!(hold_id = %hold.id, product_id, quantity, "hold created");
            }
            Err(Error::InsufficientStock {
                available,
                requested,
            }) => {
                tracing::info!(product_id, available, requested, "hold admission refused");
            }
            Err(_) => {}
        }
        result
    }

    async fn create_hold_once(&self, product_id: i32, quantity: i32) -> Result<Hold, Error> {
        let mut tx = self.pool.begin().await?;
        self.acquire_admission_lock(&mut tx, product_id).await?;
        // Bound row-lock waits so a wedged writer surfaces as SystemBusy
        // instead of hanging the request handler.
        let stmt = format!(
            "SET LOCAL lock_timeout = '{}s'",
            self.config.admission_lock_timeout.as_secs()
        );
        sqlx::query(&stmt).execute(&mut *tx).await?;

        let product = Product::lock(&mut tx, product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        let active = Hold::lock_active_for_product(&mut tx, product_id).await?;
        let held_qty: i64 = active.iter().map(|h| h.quantity as i64).sum();
        let available = product.stock as i64 - held_qty;
        if available < quantity as i64 {
            return Err(Error::InsufficientStock {
                available,
                requested: quantity,
            });
        }
        let expires_at = Utc::now() + self.config.hold_duration;
        let hold = Hold::insert(&mut tx, product_id, quantity, expires_at).await?;
        tx.commit().await?;
        Ok(hold)
    }

    /// Advisory per-product lock that serializes admission attempts ahead of
    /// the row lock. Transaction-scoped, so the lease ends at commit or
    /// rollback. Best effort: an unavailable lock falls through to the row
    /// lock (the authoritative gate) unless strict mode is on.
    async fn acquire_admission_lock(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        product_id: i32,
    ) -> Result<(), Error> {
        let key = admission_lock_key(product_id);
        let deadline = Instant::now() + self.config.admission_lock_wait;
        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                .bind(key)
                .fetch_one(&mut **tx)
                .await?;
            if acquired {
                return Ok(());
            }
            if Instant::now() + ADMISSION_POLL_INTERVAL >= deadline {
                if self.config.admission_lock_strict {
                    return Err(Error::SystemBusy);
                }
                tracing::warn!(product_id, "admission lock unavailable, relying on row locks");
                return Ok(());
            }
            tokio::time::sleep(ADMISSION_POLL_INTERVAL).await;
        }
    }

    /// Transition a hold out of `active` for order creation. The caller
    /// already holds the row lock. Expiry is detected lazily here so the
    /// design does not depend on the sweeper having run.
    pub(crate) async fn convert_locked(
        tx: &mut Transaction<'_, Postgres>,
        hold: &Hold,
    ) -> Result<Conversion, Error> {
        if !hold.is_active() {
            return Err(Error::HoldNotActive(hold.status.clone()));
        }
        if hold.is_expired_at(Utc::now()) {
            let expired = Hold::set_status(tx, hold.id, HoldStatus::Expired).await?;
            return Ok(Conversion::Expired(expired));
        }
        let converted = Hold::set_status(tx, hold.id, HoldStatus::Converted).await?;
        Ok(Conversion::Converted(converted))
    }

    /// Explicit release. Releasing a hold that already left `active` is a
    /// no-op returning its current state.
    pub async fn release_hold(&self, hold_id: Uuid) -> Result<Hold, Error> {
        let hold =
            db::retry_txn(self.config.txn_policy(), || self.release_hold_once(hold_id)).await?;
        self.cache.invalidate(hold.product_id);
        Ok(hold)
    }

    async fn release_hold_once(&self, hold_id: Uuid) -> Result<Hold, Error> {
        let mut tx = self.pool.begin().await?;
        let hold = Hold::lock(&mut tx, hold_id)
            .await?
            .ok_or(Error::NotFound("hold"))?;
        let hold = if hold.is_active() {
            Hold::set_status(&mut tx, hold_id, HoldStatus::Released).await?
        } else {
            hold
        };
        tx.commit().await?;
        Ok(hold)
    }

    /// Expiry sweep: pages over due holds and expires each in its own
    /// transaction. Safe to run concurrently with admission; the row lock
    /// serializes against the aggregate lock in create_hold.
    pub async fn expire_due(&self) -> Result<u64, Error> {
        let mut expired = 0u64;
        loop {
            let due = Hold::due_page(&self.pool, EXPIRE_PAGE_SIZE).await?;
            if due.is_empty() {
                break;
            }
            let mut progressed = 0u64;
            for hold_id in due {
                match db::retry_txn(self.config.txn_policy(), || self.expire_one(hold_id)).await {
                    Ok(Some(product_id)) => {
                        self.cache.invalidate(product_id);
                        expired += 1;
                        progressed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(hold_id = %hold_id, "failed to expire hold: {}", e),
                }
            }
            if progressed == 0 {
                break;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired due holds");
        }
        Ok(expired)
    }

    /// Re-verifies under the row lock; the hold may have been converted or
    /// released between the page read and here.
    async fn expire_one(&self, hold_id: Uuid) -> Result<Option<i32>, Error> {
        let mut tx = self.pool.begin().await?;
        let Some(hold) = Hold::lock(&mut tx, hold_id).await? else {
            return Ok(None);
        };
        if !hold.is_active() || !hold.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Hold::set_status(&mut tx, hold_id, HoldStatus::Expired).await?;
        tx.commit().await?;
        Ok(Some(hold.product_id))
    }
}

/// Deterministic advisory-lock key for a product's admission gate.
fn admission_lock_key(product_id: i32) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    format!("hold_lock:product:{}", product_id).hash(&mut hasher);
    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_lock_keys_are_stable_and_distinct() {
        assert_eq!(admission_lock_key(1), admission_lock_key(1));
        assert_ne!(admission_lock_key(1), admission_lock_key(2));
    }
}
