use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    Converted,
    Expired,
    Released,
}

impl std::fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldStatus::Active => write!(f, "active"),
            HoldStatus::Converted => write!(f, "converted"),
            HoldStatus::Expired => write!(f, "expired"),
            HoldStatus::Released => write!(f, "released"),
        }
    }
}

/// A time-bounded reservation counting against available stock but not
/// physical stock. Leaves `active` exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Hold {
    pub id: Uuid,
    pub product_id: i32,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM holds WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Exclusive row lock for the duration of the transaction.
    pub async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM holds WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Locks every active, unexpired hold of one product, freezing the set
    /// admission sums against. Serializes against the expiry sweep.
    pub async fn lock_active_for_product(
        tx: &mut Transaction<'_, Postgres>,
        product_id: i32,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM holds
             WHERE product_id = $1 AND status = 'active' AND expires_at > NOW()
             FOR UPDATE",
        )
        .bind(product_id)
        .fetch_all(&mut **tx)
        .await
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        product_id: i32,
        quantity: i32,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO holds (id, product_id, quantity, status, expires_at)
             VALUES ($1, $2, $3, 'active', $4)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(product_id)
        .bind(quantity)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn set_status(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: HoldStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "UPDATE holds SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(status.to_string())
        .bind(id)
        .fetch_one(&mut **tx)
        .await
    }

    /// One page of sweepable holds. Rows leave the predicate as they are
    /// expired, so repeated calls walk the backlog without a cursor.
    pub async fn due_page(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM holds
             WHERE status = 'active' AND expires_at <= NOW()
             ORDER BY expires_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
