//! In-process event bus backed by a bounded `tokio::sync::mpsc` channel.
//!
//! Best effort by design: `publish` never blocks and silently drops events
//! when the buffer is full, and nothing survives a restart. Use the Redis
//! Stream backend where delivery matters.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, EventBus, EventHandler};
use crate::event::WebhookEvent;

/// Default buffer capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process single-consumer event bus.
///
/// All state is owned by the instance — handlers are injected via
/// [`subscribe`](EventBus::subscribe), never registered globally.
pub struct MemoryBus {
    tx: mpsc::Sender<WebhookEvent>,
    rx: Mutex<Option<mpsc::Receiver<WebhookEvent>>>,
    cancel: CancellationToken,
}

impl MemoryBus {
    /// Create a bus with a specific buffer capacity.
    ///
    /// The consumer loop started by `subscribe` stops when `cancel` fires.
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            cancel,
        }
    }

    /// Create a bus with the default capacity.
    pub fn with_default_capacity(cancel: CancellationToken) -> Self {
        Self::new(DEFAULT_CAPACITY, cancel)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, CancellationToken::new())
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &WebhookEvent) -> Result<(), BusError> {
        if let Err(e) = self.tx.try_send(event.clone()) {
            // Full or closed: drop, per this backend's best-effort contract.
            tracing::warn!(
                event_type = %event.event_type,
                error = %e,
                "In-process bus dropped event"
            );
        }
        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or(BusError::AlreadySubscribed)?;

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("In-process bus consumer stopping");
                        break;
                    }
                    received = rx.recv() => {
                        let Some(event) = received else {
                            tracing::info!("In-process bus closed, consumer stopping");
                            break;
                        };
                        if let Err(e) = handler.handle(event).await {
                            tracing::error!(error = %e, "Event handler failed");
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct CountingHandler {
        seen: AtomicUsize,
        notify: tokio::sync::Notify,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: AtomicUsize::new(0),
                notify: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(
            &self,
            _event: WebhookEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }
    }

    #[tokio::test]
    async fn published_events_reach_the_handler() {
        let bus = MemoryBus::default();
        let handler = CountingHandler::new();
        bus.subscribe(handler.clone()).await.unwrap();

        bus.publish(&WebhookEvent::new("activity.created", 1)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handler.notify.notified())
            .await
            .expect("handler should run");
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_subscribe_is_rejected() {
        let bus = MemoryBus::default();
        bus.subscribe(CountingHandler::new()).await.unwrap();

        let result = bus.subscribe(CountingHandler::new()).await;
        assert_matches::assert_matches!(result, Err(BusError::AlreadySubscribed));
    }

    #[tokio::test]
    async fn publish_without_consumer_drops_silently() {
        let bus = MemoryBus::new(2, CancellationToken::new());

        // No subscriber and a tiny buffer: overflow must not error.
        for _ in 0..10 {
            bus.publish(&WebhookEvent::new("orphan.event", 1)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn cancellation_stops_the_consumer() {
        let cancel = CancellationToken::new();
        let bus = MemoryBus::new(DEFAULT_CAPACITY, cancel.clone());
        let handler = CountingHandler::new();
        bus.subscribe(handler.clone()).await.unwrap();

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.publish(&WebhookEvent::new("late.event", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
    }
}
