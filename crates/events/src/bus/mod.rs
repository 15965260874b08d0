//! Event bus transport abstraction.
//!
//! A bus moves a [`WebhookEvent`] from producers to the single subscribed
//! handler at least once. Two interchangeable backends exist:
//!
//! - [`stream::RedisStreamBus`] — durable Redis Stream with consumer-group
//!   semantics; survives process restarts. Production.
//! - [`memory::MemoryBus`] — fixed-capacity in-process channel; best
//!   effort, no durability. Development and tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::WebhookEvent;

pub mod memory;
pub mod stream;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The event could not be (de)serialized.
    #[error("Event serialization failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// The stream backend rejected an operation.
    #[error("Stream transport error: {0}")]
    Transport(#[from] redis::RedisError),

    /// `subscribe` was called twice on the same bus instance.
    #[error("Bus is already consuming")]
    AlreadySubscribed,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Consumer-side seam: whatever processes events off the bus.
///
/// A handler error means "not handled" — the durable backend leaves the
/// message unacknowledged so it is delivered again.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        event: WebhookEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Pluggable transport moving events from producers to the handler.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: &WebhookEvent) -> Result<(), BusError>;

    /// Register the handler and start consuming in the background.
    ///
    /// The consumer loop runs until the bus's cancellation token fires.
    /// Calling this a second time on the same instance returns
    /// [`BusError::AlreadySubscribed`].
    async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError>;
}
