pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod routes;
pub mod sweeper;

use std::sync::Arc;

use sqlx::PgPool;

use cache::StockCache;
use config::Config;
use engine::{HoldEngine, OrderEngine, WebhookEngine};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub cache: StockCache,
    pub holds: HoldEngine,
    pub orders: OrderEngine,
    pub webhooks: WebhookEngine,
}

impl AppState {
    /// Composition root: one cache, three engines, all sharing the pool and
    /// configuration. No process-wide singletons.
    pub fn new(pool: PgPool, config: Arc<Config>) -> Self {
        let cache = StockCache::new(config.stock_cache_ttl);
        let holds = HoldEngine::new(pool.clone(), cache.clone(), config.clone());
        let orders = OrderEngine::new(pool.clone(), cache.clone(), config.clone());
        let webhooks = WebhookEngine::new(pool.clone(), cache.clone(), config.clone());
        Self {
            pool,
            config,
            cache,
            holds,
            orders,
            webhooks,
        }
    }
}
