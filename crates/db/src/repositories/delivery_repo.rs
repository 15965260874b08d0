//! Repository for the `webhook_deliveries` audit table.
//!
//! Every state-changing update is guarded by
//! `status IN ('pending', 'failed')`, so terminal rows (`succeeded`,
//! `exhausted`) are immutable at the SQL level regardless of caller bugs.

use sqlx::PgPool;

use relay_core::types::{DbId, Timestamp};

use crate::models::webhook::{DueDelivery, WebhookDelivery};

// ---------------------------------------------------------------------------
// Column lists
// ---------------------------------------------------------------------------

const DELIVERY_COLUMNS: &str = "\
    id, webhook_id, event_key, event_type, payload, status, attempt_count, \
    max_attempts, last_http_status, last_error, next_retry_at, created_at, \
    updated_at";

const DUE_COLUMNS: &str = "\
    d.id, d.webhook_id, d.event_type, d.payload, d.attempt_count, \
    d.max_attempts, w.url, w.secret";

/// Provides the delivery audit-store operations.
pub struct DeliveryRepo;

impl DeliveryRepo {
    /// Create a new delivery row (status = 'pending', zero attempts).
    ///
    /// Creation is idempotent over `(webhook_id, event_key)`: when the bus
    /// redelivers an event whose row already exists, this returns `None`
    /// and no second row is created.
    pub async fn create(
        pool: &PgPool,
        webhook_id: DbId,
        event_key: &str,
        event_type: &str,
        payload: &serde_json::Value,
        max_attempts: i16,
    ) -> Result<Option<WebhookDelivery>, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhook_deliveries \
                 (webhook_id, event_key, event_type, payload, max_attempts) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (webhook_id, event_key) DO NOTHING \
             RETURNING {DELIVERY_COLUMNS}"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(webhook_id)
            .bind(event_key)
            .bind(event_type)
            .bind(payload)
            .bind(max_attempts)
            .fetch_optional(pool)
            .await
    }

    /// Mark a delivery as succeeded (terminal).
    ///
    /// Returns `false` if the row was already terminal.
    pub async fn mark_succeeded(
        pool: &PgPool,
        id: DbId,
        http_status: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries SET \
                 status = 'succeeded', \
                 attempt_count = attempt_count + 1, \
                 last_http_status = $2, \
                 last_error = NULL, \
                 next_retry_at = NULL \
             WHERE id = $1 AND status IN ('pending', 'failed')",
        )
        .bind(id)
        .bind(http_status)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed attempt.
    ///
    /// Atomically increments `attempt_count`; when the cap is reached the
    /// row flips to `exhausted` (terminal, `next_retry_at` cleared),
    /// otherwise to `failed` with the caller-computed `next_retry_at`.
    /// Returns `false` if the row was already terminal.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        http_status: Option<i16>,
        error: &str,
        next_retry_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries SET \
                 status = CASE WHEN attempt_count + 1 >= max_attempts \
                     THEN 'exhausted' ELSE 'failed' END, \
                 attempt_count = attempt_count + 1, \
                 last_http_status = $2, \
                 last_error = $3, \
                 next_retry_at = CASE WHEN attempt_count + 1 >= max_attempts \
                     THEN NULL ELSE $4 END \
             WHERE id = $1 AND status IN ('pending', 'failed')",
        )
        .bind(id)
        .bind(http_status)
        .bind(error)
        .bind(next_retry_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List deliveries due for another attempt, joined with their still
    /// active registration.
    ///
    /// Ordered by `next_retry_at` ascending and capped at `limit`, so the
    /// longest-waiting rows are picked first. Terminal rows never match
    /// (`next_retry_at` is NULL once terminal).
    pub async fn list_due(pool: &PgPool, limit: i64) -> Result<Vec<DueDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {DUE_COLUMNS} FROM webhook_deliveries d \
             JOIN webhooks w ON w.id = d.webhook_id \
             WHERE d.status IN ('pending', 'failed') \
               AND d.next_retry_at IS NOT NULL \
               AND d.next_retry_at <= NOW() \
               AND w.is_active \
             ORDER BY d.next_retry_at ASC \
             LIMIT $1"
        );
        sqlx::query_as::<_, DueDelivery>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Find a delivery by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<WebhookDelivery>, sqlx::Error> {
        let query = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1");
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List delivery history for a webhook with pagination (newest first).
    pub async fn list_for_webhook(
        pool: &PgPool,
        webhook_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
             WHERE webhook_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(webhook_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
