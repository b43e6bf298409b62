use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processed => write!(f, "processed"),
        }
    }
}

/// A payment notification. `order_id` is not a foreign key: webhooks may
/// arrive before the order they settle has committed, and are then stored
/// `pending` until the drain sweep picks them up.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentWebhook {
    pub id: Uuid,
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub payment_status: String,
    pub processing_status: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentWebhook {
    pub fn is_processed(&self) -> bool {
        self.processing_status == "processed"
    }

    pub async fn find_by_key(pool: &PgPool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM payment_webhooks WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
    }

    /// Lock-read by idempotency key; the serialization point for duplicate
    /// notifications.
    pub async fn lock_by_key(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM payment_webhooks WHERE idempotency_key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM payment_webhooks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        idempotency_key: &str,
        order_id: Uuid,
        payment_status: PaymentStatus,
        payload: Option<serde_json::Value>,
        processing_status: ProcessingStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO payment_webhooks
                 (id, idempotency_key, order_id, payment_status, processing_status, payload)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(idempotency_key)
        .bind(order_id)
        .bind(payment_status.to_string())
        .bind(processing_status.to_string())
        .bind(payload)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn mark_processed(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "UPDATE payment_webhooks
             SET processing_status = 'processed', updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await
    }

    /// Keyset-paged scan of pending webhooks. Rows that stay pending (their
    /// order still absent) are skipped by the cursor rather than re-fetched,
    /// so one drain pass terminates.
    pub async fn pending_page(
        pool: &PgPool,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let (cursor_at, cursor_id) = match cursor {
            Some((at, id)) => (Some(at), Some(id)),
            None => (None, None),
        };
        sqlx::query_as::<_, Self>(
            "SELECT * FROM payment_webhooks
             WHERE processing_status = 'pending'
               AND ($1::TIMESTAMPTZ IS NULL OR (created_at, id) > ($1::TIMESTAMPTZ, $2::UUID))
             ORDER BY created_at, id
             LIMIT $3",
        )
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
