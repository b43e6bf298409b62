use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    /// Physical inventory, decremented only on payment success.
    pub stock: i32,
    /// Optimistic-lock tag, bumped on every stock-changing commit.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub async fn find(pool: &PgPool, id: i32) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM products ORDER BY id")
            .fetch_all(pool)
            .await
    }

    /// Plain read inside a transaction (no lock), e.g. for price snapshots.
    pub async fn find_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Exclusive row lock for the duration of the transaction.
    pub async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Physical stock decrement on payment success; bumps the version tag.
    /// Caller must hold the row lock and have verified stock >= quantity.
    pub async fn deduct_stock(
        tx: &mut Transaction<'_, Postgres>,
        id: i32,
        quantity: i32,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "UPDATE products
             SET stock = stock - $1, version = version + 1, updated_at = NOW()
             WHERE id = $2
             RETURNING *",
        )
        .bind(quantity)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
    }
}
