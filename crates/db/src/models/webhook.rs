//! Webhook registry and delivery audit models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use relay_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// WebhookRegistration
// ---------------------------------------------------------------------------

/// A row from the `webhooks` table.
///
/// **Note:** `secret` is the HMAC signing key issued once at registration
/// time; it is never serialized into responses.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookRegistration {
    pub id: DbId,
    /// Owning user; registrations are read-only from the delivery side.
    pub user_id: DbId,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// JSONB array of subscribed event-type names.
    pub event_types: serde_json::Value,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a new registration.
///
/// The signing secret is not part of the DTO; it is generated by the caller
/// via `relay_core::signing::generate_secret` and shown to the user exactly
/// once.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRegistration {
    pub user_id: DbId,
    pub url: String,
    /// Event-type names to subscribe to.
    pub event_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// A row from the `webhook_deliveries` table.
///
/// One row is created per (event, matching registration) pair at dispatch
/// time and never deleted; terminal rows form the delivery audit trail.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookDelivery {
    pub id: DbId,
    pub webhook_id: DbId,
    /// Stable per-event dedup key; unique together with `webhook_id`.
    pub event_key: String,
    pub event_type: String,
    /// Full event envelope captured at dispatch time, so every retry posts
    /// the same content the first attempt did.
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i16,
    pub max_attempts: i16,
    pub last_http_status: Option<i16>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// DueDelivery
// ---------------------------------------------------------------------------

/// A due delivery joined with its (still active) registration.
///
/// This is the retry worker's working set: everything an attempt needs
/// without a second registration lookup.
#[derive(Debug, Clone, FromRow)]
pub struct DueDelivery {
    pub id: DbId,
    pub webhook_id: DbId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempt_count: i16,
    pub max_attempts: i16,
    pub url: String,
    pub secret: String,
}
