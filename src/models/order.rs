use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::Hold;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    Refunded,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::PendingPayment => write!(f, "pending_payment"),
            OrderStatus::Paid => write!(f, "paid"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Refunded => write!(f, "refunded"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    /// Unique: at most one order per hold.
    pub hold_id: Uuid,
    pub product_id: i32,
    pub quantity: i32,
    /// Price snapshot taken at conversion time.
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Terminal states admit no further transitions.
    pub fn is_finalized(&self) -> bool {
        matches!(self.status.as_str(), "paid" | "cancelled" | "refunded")
    }

    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn find_by_hold(
        tx: &mut Transaction<'_, Postgres>,
        hold_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE hold_id = $1")
            .bind(hold_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Exclusive row lock for the duration of the transaction.
    pub async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        hold: &Hold,
        unit_price: Decimal,
    ) -> Result<Self, sqlx::Error> {
        let total_price = unit_price * Decimal::from(hold.quantity);
        sqlx::query_as::<_, Self>(
            "INSERT INTO orders (id, hold_id, product_id, quantity, unit_price, total_price, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending_payment')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(hold.id)
        .bind(hold.product_id)
        .bind(hold.quantity)
        .bind(unit_price)
        .bind(total_price)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(status.to_string())
        .bind(id)
        .fetch_one(&mut **tx)
        .await
    }
}
