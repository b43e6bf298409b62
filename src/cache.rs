use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read-through TTL cache of available stock per product. Serves the public
/// read endpoints only; admission always recomputes under row locks, so a
/// stale entry can transiently over-report but never admits a hold.
#[derive(Clone)]
pub struct StockCache {
    entries: Arc<DashMap<i32, CachedStock>>,
    ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
struct CachedStock {
    available: i64,
    refreshed_at: Instant,
}

impl StockCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Possibly-stale available stock. Misses and expired entries repopulate
    /// from the store; an unknown product reads as 0.
    pub async fn available(&self, pool: &PgPool, product_id: i32) -> Result<i64, sqlx::Error> {
        if let Some(entry) = self.entries.get(&product_id) {
            if entry.refreshed_at.elapsed() < self.ttl {
                return Ok(entry.available);
            }
        }
        let available = available_stock(pool, product_id).await?;
        self.entries.insert(
            product_id,
            CachedStock {
                available,
                refreshed_at: Instant::now(),
            },
        );
        Ok(available)
    }

    /// Idempotent; called after any commit that changes availability (hold
    /// created/expired/released, order paid/cancelled).
    pub fn invalidate(&self, product_id: i32) {
        self.entries.remove(&product_id);
    }
}

/// Authoritative available-stock computation: physical stock minus active,
/// unexpired hold quantities.
pub async fn available_stock(pool: &PgPool, product_id: i32) -> Result<i64, sqlx::Error> {
    let available: Option<i64> = sqlx::query_scalar(
        "SELECT p.stock::BIGINT - COALESCE((
             SELECT SUM(h.quantity) FROM holds h
             WHERE h.product_id = p.id AND h.status = 'active' AND h.expires_at > NOW()
         ), 0)
         FROM products p WHERE p.id = $1",
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await?;
    Ok(available.unwrap_or(0).max(0))
}
