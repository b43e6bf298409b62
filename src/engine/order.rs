use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::hold::{Conversion, HoldEngine};
use crate::cache::StockCache;
use crate::config::Config;
use crate::db;
use crate::error::Error;
use crate::models::{Hold, HoldStatus, Order, OrderStatus, Product};

enum CreateOutcome {
    Order(Order),
    ExpiredHold { product_id: i32 },
}

/// Converts holds to orders and applies terminal transitions. Owns the
/// physical stock decrement: deduction happens on payment success, not at
/// order creation, so a cancellation restores availability by releasing the
/// hold instead of touching stock.
#[derive(Clone)]
pub struct OrderEngine {
    pool: PgPool,
    cache: StockCache,
    config: Arc<Config>,
}

impl OrderEngine {
    pub fn new(pool: PgPool, cache: StockCache, config: Arc<Config>) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    /// Converts a hold into an order exactly once. A retried call for the
    /// same hold returns the existing order unchanged.
    pub async fn create_order_from_hold(&self, hold_id: Uuid) -> Result<Order, Error> {
        let outcome =
            db::retry_txn(self.config.txn_policy(), || self.create_order_once(hold_id)).await?;
        match outcome {
            CreateOutcome::Order(order) => Ok(order),
            CreateOutcome::ExpiredHold { product_id } => {
                // The expiry transition committed; only this call fails.
                self.cache.invalidate(product_id);
                Err(Error::HoldExpired)
            }
        }
    }

    async fn create_order_once(&self, hold_id: Uuid) -> Result<CreateOutcome, Error> {
        let mut tx = self.pool.begin().await?;
        let hold = Hold::lock(&mut tx, hold_id)
            .await?
            .ok_or(Error::NotFound("hold"))?;
        if let Some(existing) = Order::find_by_hold(&mut tx, hold_id).await? {
            return Ok(CreateOutcome::Order(existing));
        }
        match HoldEngine::convert_locked(&mut tx, &hold).await? {
            Conversion::Expired(hold) => {
                tx.commit().await?;
                Ok(CreateOutcome::ExpiredHold {
                    product_id: hold.product_id,
                })
            }
            Conversion::Converted(hold) => {
                let product = Product::find_in_tx(&mut tx, hold.product_id)
                    .await?
                    .ok_or(Error::NotFound("product"))?;
                let order = Order::insert(&mut tx, &hold, product.price).await?;
                tx.commit().await?;
                tracing::debug!(order_id = %order.id, hold_id = %hold.id, "order created");
                Ok(CreateOutcome::Order(order))
            }
        }
    }

    pub async fn mark_paid(&self, order_id: Uuid) -> Result<Order, Error> {
        let order =
            db::retry_txn(self.config.txn_policy(), || self.mark_paid_once(order_id)).await?;
        self.cache.invalidate(order.product_id);
        Ok(order)
    }

    async fn mark_paid_once(&self, order_id: Uuid) -> Result<Order, Error> {
        let mut tx = self.pool.begin().await?;
        let order = Self::mark_paid_in_tx(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Applies payment success under the order row lock. The stock
    /// decrement, version bump, and status flip commit atomically in the
    /// caller's transaction. Already-paid orders are a no-op; other terminal
    /// states refuse.
    pub(crate) async fn mark_paid_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Order, Error> {
        let order = Order::lock(tx, order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if order.status == "paid" {
            return Ok(order);
        }
        if order.status != "pending_payment" {
            return Err(Error::TerminalState(order.status));
        }
        let product = Product::lock(tx, order.product_id)
            .await?
            .ok_or(Error::NotFound("product"))?;
        if product.stock < order.quantity {
            // Should be unreachable: holds reserve availability before any
            // order exists. Seeing it means an upper layer skipped admission.
            tracing::error!(
                order_id = %order.id,
                product_id = product.id,
                stock = product.stock,
                quantity = order.quantity,
                "stock invariant violated"
            );
            return Err(Error::StockInvariant(product.id));
        }
        Product::deduct_stock(tx, product.id, order.quantity).await?;
        let order = Order::set_status(tx, order_id, OrderStatus::Paid).await?;
        Ok(order)
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, Error> {
        let order =
            db::retry_txn(self.config.txn_policy(), || self.cancel_order_once(order_id)).await?;
        self.cache.invalidate(order.product_id);
        Ok(order)
    }

    async fn cancel_order_once(&self, order_id: Uuid) -> Result<Order, Error> {
        let mut tx = self.pool.begin().await?;
        let order = Self::cancel_order_in_tx(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Cancels a pending order and releases its hold. Stock is untouched;
    /// it was never deducted. Already-cancelled orders are a no-op.
    pub(crate) async fn cancel_order_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Order, Error> {
        let order = Order::lock(tx, order_id)
            .await?
            .ok_or(Error::NotFound("order"))?;
        if order.status == "cancelled" {
            return Ok(order);
        }
        if order.status != "pending_payment" {
            return Err(Error::TerminalState(order.status));
        }
        if let Some(hold) = Hold::lock(tx, order.hold_id).await? {
            if hold.status == "converted" {
                Hold::set_status(tx, hold.id, HoldStatus::Released).await?;
            }
        }
        let order = Order::set_status(tx, order_id, OrderStatus::Cancelled).await?;
        Ok(order)
    }
}
