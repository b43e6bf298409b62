use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::order::OrderEngine;
use crate::cache::StockCache;
use crate::config::Config;
use crate::db;
use crate::error::Error;
use crate::models::{Order, PaymentStatus, PaymentWebhook, ProcessingStatus};

const DRAIN_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum WebhookOutcome {
    /// The payment effect was applied in this call.
    Processed { webhook_id: Uuid, order: Order },
    /// The idempotency key was seen before; nothing was re-applied.
    Duplicate {
        webhook_id: Uuid,
        processing_status: String,
        order_status: Option<String>,
    },
    /// The order does not exist yet; the webhook is stored for the drain
    /// sweep to settle.
    Pending { webhook_id: Uuid },
    /// The order was already terminal; the key is remembered but no effect
    /// is applied.
    AlreadyFinalized {
        webhook_id: Uuid,
        order_status: String,
    },
}

/// Result of settling one stored pending webhook.
enum Drain {
    Skipped,
    Sealed,
    Settled { product_id: i32 },
}

/// Enforces at-most-once application of payment notifications and drives
/// order settlement. The unique index on idempotency_key is the hard
/// backstop: two concurrent webhooks with the same key race past the
/// lock-read, one insert fails on the constraint, retries, and observes the
/// winner's row.
#[derive(Clone)]
pub struct WebhookEngine {
    pool: PgPool,
    cache: StockCache,
    config: Arc<Config>,
}

impl WebhookEngine {
    pub fn new(pool: PgPool, cache: StockCache, config: Arc<Config>) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    pub async fn process_webhook(&self, req: WebhookRequest) -> Result<WebhookOutcome, Error> {
        if req.idempotency_key.is_empty() || req.idempotency_key.len() > 255 {
            return Err(Error::Validation(
                "idempotency_key must be 1-255 characters".into(),
            ));
        }
        let outcome =
            db::retry_txn(self.config.txn_policy(), || self.process_webhook_once(&req)).await?;
        match &outcome {
            WebhookOutcome::Processed { order, .. } => {
                self.cache.invalidate(order.product_id);
                tracing::info!(
                    order_id = %order.id,
                    order_status = %order.status,
                    "webhook processed"
                );
            }
            WebhookOutcome::Duplicate { webhook_id, .. } => {
                tracing::debug!(webhook_id = %webhook_id, "duplicate webhook ignored");
            }
            WebhookOutcome::Pending { webhook_id } => {
                tracing::info!(
                    webhook_id = %webhook_id,
                    order_id = %req.order_id,
                    "webhook stored pending, order not found yet"
                );
            }
            WebhookOutcome::AlreadyFinalized { order_status, .. } => {
                tracing::info!(
                    order_id = %req.order_id,
                    order_status = %order_status,
                    "late webhook absorbed, order already finalized"
                );
            }
        }
        Ok(outcome)
    }

    async fn process_webhook_once(&self, req: &WebhookRequest) -> Result<WebhookOutcome, Error> {
        let mut tx = self.pool.begin().await?;

        // Idempotency: a stored row wins, whatever its processing state.
        if let Some(existing) = PaymentWebhook::lock_by_key(&mut tx, &req.idempotency_key).await? {
            let order_status = Order::find_in_tx(&mut tx, existing.order_id)
                .await?
                .map(|o| o.status);
            return Ok(WebhookOutcome::Duplicate {
                webhook_id: existing.id,
                processing_status: existing.processing_status,
                order_status,
            });
        }

        // Brief bounded wait absorbs an order creation racing this webhook.
        let mut order = Order::lock(&mut tx, req.order_id).await?;
        let mut attempt = 1;
        while order.is_none() && attempt < self.config.order_wait_attempts {
            tokio::time::sleep(self.config.order_wait_sleep).await;
            order = Order::lock(&mut tx, req.order_id).await?;
            attempt += 1;
        }
        let Some(order) = order else {
            let webhook = Self::persist(&mut tx, req, ProcessingStatus::Pending).await?;
            tx.commit().await?;
            return Ok(WebhookOutcome::Pending {
                webhook_id: webhook.id,
            });
        };

        // Conflicting or repeated notifications for a settled order are
        // absorbed: remember the key, apply nothing.
        if order.is_finalized() {
            let webhook = Self::persist(&mut tx, req, ProcessingStatus::Processed).await?;
            tx.commit().await?;
            return Ok(WebhookOutcome::AlreadyFinalized {
                webhook_id: webhook.id,
                order_status: order.status,
            });
        }

        let webhook = Self::persist(&mut tx, req, ProcessingStatus::Pending).await?;
        let order = match req.payment_status {
            PaymentStatus::Success => OrderEngine::mark_paid_in_tx(&mut tx, order.id).await?,
            PaymentStatus::Failed => OrderEngine::cancel_order_in_tx(&mut tx, order.id).await?,
        };
        let webhook = PaymentWebhook::mark_processed(&mut tx, webhook.id).await?;
        tx.commit().await?;
        Ok(WebhookOutcome::Processed {
            webhook_id: webhook.id,
            order,
        })
    }

    async fn persist(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        req: &WebhookRequest,
        status: ProcessingStatus,
    ) -> Result<PaymentWebhook, sqlx::Error> {
        PaymentWebhook::insert(
            tx,
            &req.idempotency_key,
            req.order_id,
            req.payment_status,
            req.payload.clone(),
            status,
        )
        .await
    }

    /// Settles stored pending webhooks whose order has since appeared. One
    /// transaction per webhook; rows whose order is still absent stay
    /// pending and are passed over by the cursor.
    pub async fn drain_pending(&self) -> Result<u64, Error> {
        let mut processed = 0u64;
        let mut cursor: Option<(DateTime<Utc>, Uuid)> = None;
        loop {
            let page = PaymentWebhook::pending_page(&self.pool, cursor, DRAIN_PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some((last.created_at, last.id));
            for webhook in page {
                let webhook_id = webhook.id;
                match db::retry_txn(self.config.txn_policy(), || self.settle_pending(webhook_id))
                    .await
                {
                    Ok(Drain::Settled { product_id }) => {
                        self.cache.invalidate(product_id);
                        processed += 1;
                    }
                    Ok(Drain::Sealed) => processed += 1,
                    Ok(Drain::Skipped) => {}
                    Err(e) => {
                        tracing::error!(
                            webhook_id = %webhook_id,
                            "failed to settle pending webhook: {}",
                            e
                        );
                    }
                }
            }
        }
        if processed > 0 {
            tracing::info!(processed, "drained pending webhooks");
        }
        Ok(processed)
    }

    async fn settle_pending(&self, webhook_id: Uuid) -> Result<Drain, Error> {
        let mut tx = self.pool.begin().await?;
        let Some(webhook) = PaymentWebhook::lock(&mut tx, webhook_id).await? else {
            return Ok(Drain::Skipped);
        };
        if webhook.is_processed() {
            return Ok(Drain::Skipped);
        }
        let Some(order) = Order::lock(&mut tx, webhook.order_id).await? else {
            // Order still absent; leave the webhook pending.
            return Ok(Drain::Skipped);
        };
        if order.is_finalized() {
            PaymentWebhook::mark_processed(&mut tx, webhook.id).await?;
            tx.commit().await?;
            return Ok(Drain::Sealed);
        }
        let order = match webhook.payment_status.as_str() {
            "success" => OrderEngine::mark_paid_in_tx(&mut tx, order.id).await?,
            _ => OrderEngine::cancel_order_in_tx(&mut tx, order.id).await?,
        };
        PaymentWebhook::mark_processed(&mut tx, webhook.id).await?;
        tx.commit().await?;
        Ok(Drain::Settled {
            product_id: order.product_id,
        })
    }
}
