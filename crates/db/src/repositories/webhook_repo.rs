//! Repository for the `webhooks` registry table.
//!
//! The registry is written by the registration surface and read by the
//! delivery dispatcher; from the delivery side it is strictly read-only.

use sqlx::PgPool;

use relay_core::types::DbId;

use crate::models::webhook::WebhookRegistration;

// ---------------------------------------------------------------------------
// Column list
// ---------------------------------------------------------------------------

const REGISTRATION_COLUMNS: &str = "\
    id, user_id, url, secret, event_types, is_active, created_at, updated_at";

/// Provides CRUD operations for webhook registrations.
pub struct WebhookRepo;

impl WebhookRepo {
    /// Create a new registration.
    ///
    /// `secret` is generated by the caller (shown to the user exactly once)
    /// and never re-exposed after this call.
    pub async fn create(
        pool: &PgPool,
        user_id: DbId,
        url: &str,
        secret: &str,
        event_types: &serde_json::Value,
    ) -> Result<WebhookRegistration, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhooks (user_id, url, secret, event_types) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {REGISTRATION_COLUMNS}"
        );
        sqlx::query_as::<_, WebhookRegistration>(&query)
            .bind(user_id)
            .bind(url)
            .bind(secret)
            .bind(event_types)
            .fetch_one(pool)
            .await
    }

    /// Find a registration by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<WebhookRegistration>, sqlx::Error> {
        let query = format!("SELECT {REGISTRATION_COLUMNS} FROM webhooks WHERE id = $1");
        sqlx::query_as::<_, WebhookRegistration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all registrations owned by a user (newest first).
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<WebhookRegistration>, sqlx::Error> {
        let query = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM webhooks \
             WHERE user_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, WebhookRegistration>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// List active registrations subscribed to the given event type.
    ///
    /// This is the dispatch-path lookup: `event_types` is a JSONB array of
    /// event-type names, so the JSONB `?` operator tests membership.
    pub async fn list_active_by_event(
        pool: &PgPool,
        event_type: &str,
    ) -> Result<Vec<WebhookRegistration>, sqlx::Error> {
        let query = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM webhooks \
             WHERE is_active AND event_types ? $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, WebhookRegistration>(&query)
            .bind(event_type)
            .fetch_all(pool)
            .await
    }

    /// Enable or disable a registration.
    pub async fn set_active(
        pool: &PgPool,
        id: DbId,
        is_active: bool,
    ) -> Result<Option<WebhookRegistration>, sqlx::Error> {
        let query = format!(
            "UPDATE webhooks SET is_active = $2 WHERE id = $1 \
             RETURNING {REGISTRATION_COLUMNS}"
        );
        sqlx::query_as::<_, WebhookRegistration>(&query)
            .bind(id)
            .bind(is_active)
            .fetch_optional(pool)
            .await
    }

    /// Delete a registration. Cascade deletes its delivery history.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
