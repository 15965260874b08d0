//! Signed HTTP delivery and the shared attempt/outcome logic.
//!
//! One attempt = one `POST` of the serialized event envelope to the
//! registered URL, authenticated by an HMAC signature header, followed by
//! exactly one atomic row update recording the outcome. The dispatcher
//! (first attempt) and the retry worker (subsequent attempts) both go
//! through [`run_attempt`], so outcome handling cannot drift between them.

use std::time::Duration;

use chrono::Utc;

use relay_core::backoff;
use relay_core::delivery::DELIVERY_TIMEOUT_SECS;
use relay_core::signing;
use relay_core::types::DbId;
use relay_db::repositories::DeliveryRepo;
use relay_db::DbPool;

/// Signature header carried by every delivery request.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Event-type header carried by every delivery request.
pub const EVENT_TYPE_HEADER: &str = "X-Webhook-Event";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for a single delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The HTTP request failed before a response arrived (DNS, connect,
    /// timeout, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote endpoint answered outside [200, 300).
    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

impl SendError {
    /// The HTTP status to record on the delivery row, when one exists.
    pub fn http_status(&self) -> Option<i16> {
        match self {
            Self::Request(e) => e.status().map(|s| s.as_u16() as i16),
            Self::HttpStatus(status) => Some(*status as i16),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliverySender
// ---------------------------------------------------------------------------

/// Sends signed webhook requests to registered endpoints.
pub struct DeliverySender {
    client: reqwest::Client,
}

impl DeliverySender {
    /// Create a sender with the fixed per-attempt timeout baked into the
    /// HTTP client.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client }
    }

    /// Execute a single signed POST.
    ///
    /// Returns the HTTP status on success ([200, 300)); anything else —
    /// including timeout and connection failure — is an error.
    pub async fn send(
        &self,
        url: &str,
        secret: &str,
        event_type: &str,
        body: &[u8],
    ) -> Result<u16, SendError> {
        let signature = signing::sign_body(secret, body);

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_TYPE_HEADER, event_type)
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(SendError::HttpStatus(status.as_u16()))
        }
    }
}

impl Default for DeliverySender {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Attempt execution
// ---------------------------------------------------------------------------

/// Everything one attempt needs, independent of where it was scheduled.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub delivery_id: DbId,
    pub webhook_id: DbId,
    pub event_type: String,
    /// Serialized event envelope (the request body).
    pub body: Vec<u8>,
    /// Attempts performed before this one.
    pub attempt_count: i16,
    pub url: String,
    pub secret: String,
}

/// Run one delivery attempt and persist its outcome.
///
/// On success the row becomes `succeeded` (terminal). On failure the row's
/// attempt count is incremented in SQL — flipping to `exhausted` at the
/// cap, otherwise to `failed` with the next slot from the fixed backoff
/// schedule. Store errors are logged; the row then simply stays due and a
/// later poll picks it up again.
pub async fn run_attempt(pool: &DbPool, sender: &DeliverySender, ctx: AttemptContext) {
    match sender.send(&ctx.url, &ctx.secret, &ctx.event_type, &ctx.body).await {
        Ok(http_status) => {
            tracing::info!(
                delivery_id = ctx.delivery_id,
                webhook_id = ctx.webhook_id,
                http_status,
                attempt = ctx.attempt_count + 1,
                "Webhook delivered"
            );
            match DeliveryRepo::mark_succeeded(pool, ctx.delivery_id, http_status as i16).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        delivery_id = ctx.delivery_id,
                        "Delivery already terminal, success not recorded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        delivery_id = ctx.delivery_id,
                        error = %e,
                        "Failed to record delivery success"
                    );
                }
            }
        }
        Err(e) => {
            let next_retry_at = backoff::next_retry_at(Utc::now(), ctx.attempt_count + 1);
            tracing::warn!(
                delivery_id = ctx.delivery_id,
                webhook_id = ctx.webhook_id,
                attempt = ctx.attempt_count + 1,
                error = %e,
                "Webhook delivery attempt failed"
            );
            if let Err(db_err) = DeliveryRepo::mark_failed(
                pool,
                ctx.delivery_id,
                e.http_status(),
                &e.to_string(),
                next_retry_at,
            )
            .await
            {
                tracing::error!(
                    delivery_id = ctx.delivery_id,
                    error = %db_err,
                    "Failed to record delivery failure"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
