//! Event-to-delivery dispatch.
//!
//! [`Dispatcher`] is the bus handler: it turns one event into N
//! independent delivery attempts — one per active registration subscribed
//! to the event's type — and returns as soon as the rows are persisted so
//! the bus entry can be acknowledged without waiting on slow endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use relay_core::delivery::DEFAULT_MAX_ATTEMPTS;
use relay_db::repositories::{DeliveryRepo, WebhookRepo};
use relay_db::DbPool;

use crate::bus::EventHandler;
use crate::delivery::{run_attempt, AttemptContext, DeliverySender};
use crate::event::WebhookEvent;

/// Converts one bus event into per-registration delivery attempts.
pub struct Dispatcher {
    pool: DbPool,
    sender: Arc<DeliverySender>,
    /// Fan-out bound shared with the retry worker.
    limiter: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// `limiter` caps concurrent in-flight attempts process-wide; pass the
    /// same semaphore to the retry worker.
    pub fn new(pool: DbPool, sender: Arc<DeliverySender>, limiter: Arc<Semaphore>) -> Self {
        Self {
            pool,
            sender,
            limiter,
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    /// Persist one delivery row per matching registration, then launch the
    /// first attempts as detached tasks.
    ///
    /// Returning `Ok` acknowledges the bus entry — which is only correct
    /// because every row is durably persisted by then. Any store error
    /// propagates as `Err`, the entry stays unacknowledged, and the event
    /// is redelivered; row creation is idempotent, so the rerun cannot
    /// duplicate work.
    async fn handle(
        &self,
        event: WebhookEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let registrations =
            WebhookRepo::list_active_by_event(&self.pool, &event.event_type).await?;

        if registrations.is_empty() {
            tracing::debug!(event_type = %event.event_type, "No registrations for event");
            return Ok(());
        }

        let event_key = event.dedup_key();
        let envelope = serde_json::to_value(&event)?;
        let body = event.to_bytes()?;

        let mut launched = 0usize;
        for registration in registrations {
            let created = DeliveryRepo::create(
                &self.pool,
                registration.id,
                &event_key,
                &event.event_type,
                &envelope,
                DEFAULT_MAX_ATTEMPTS,
            )
            .await?;

            let Some(delivery) = created else {
                tracing::debug!(
                    webhook_id = registration.id,
                    event_type = %event.event_type,
                    "Delivery row already exists, skipping"
                );
                continue;
            };

            launched += 1;
            let pool = self.pool.clone();
            let sender = self.sender.clone();
            let limiter = self.limiter.clone();
            let ctx = AttemptContext {
                delivery_id: delivery.id,
                webhook_id: delivery.webhook_id,
                event_type: delivery.event_type,
                body: body.clone(),
                attempt_count: delivery.attempt_count,
                url: registration.url,
                secret: registration.secret,
            };

            // Detached from this handler's lifetime: the bus entry is
            // acknowledged while the attempt is still in flight.
            tokio::spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return, // semaphore closed: shutting down
                };
                run_attempt(&pool, &sender, ctx).await;
            });
        }

        tracing::info!(
            event_type = %event.event_type,
            user_id = event.user_id,
            deliveries = launched,
            "Event dispatched"
        );

        Ok(())
    }
}
