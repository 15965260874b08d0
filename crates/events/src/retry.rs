//! Crash-resilient retry worker.
//!
//! The only component that resumes non-terminal deliveries after their
//! first attempt. It polls the audit store on a fixed interval for rows
//! whose retry time has elapsed and replays them through the exact same
//! attempt logic as the dispatcher, so a process crash between attempts
//! costs at most one poll interval.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use relay_db::repositories::DeliveryRepo;
use relay_db::DbPool;

use crate::config::RetryConfig;
use crate::delivery::{run_attempt, AttemptContext, DeliverySender};

/// Background service resuming due webhook deliveries.
pub struct RetryWorker {
    pool: DbPool,
    sender: Arc<DeliverySender>,
    /// Fan-out bound shared with the dispatcher.
    limiter: Arc<Semaphore>,
    config: RetryConfig,
}

impl RetryWorker {
    /// Create a worker sharing the dispatcher's sender and semaphore.
    pub fn new(
        pool: DbPool,
        sender: Arc<DeliverySender>,
        limiter: Arc<Semaphore>,
        config: RetryConfig,
    ) -> Self {
        Self {
            pool,
            sender,
            limiter,
            config,
        }
    }

    /// Run the polling loop.
    ///
    /// Scans every `poll_interval_secs` until `cancel` fires. Attempts
    /// already in flight when the token fires run to completion (bounded
    /// by the per-attempt timeout) rather than being aborted mid-request.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "Retry worker started"
        );

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retry worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(resumed) => {
                            if resumed > 0 {
                                tracing::info!(resumed, "Retry worker resumed due deliveries");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Retry poll failed");
                        }
                    }
                }
            }
        }
    }

    /// Scan for due rows and replay them, returning how many were resumed.
    ///
    /// Attempts within one poll run concurrently (bounded by the shared
    /// semaphore); the poll itself completes only after every outcome has
    /// been written, so one scan never overlaps itself.
    pub async fn poll_once(&self) -> Result<usize, sqlx::Error> {
        let due = DeliveryRepo::list_due(&self.pool, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut attempts = Vec::with_capacity(due.len());
        for row in due {
            let body = match serde_json::to_vec(&row.payload) {
                Ok(body) => body,
                Err(e) => {
                    // Should be unreachable for a stored JSONB value; skip
                    // rather than poison the whole batch.
                    tracing::error!(
                        delivery_id = row.id,
                        error = %e,
                        "Failed to serialize stored payload"
                    );
                    continue;
                }
            };

            let pool = self.pool.clone();
            let sender = self.sender.clone();
            let limiter = self.limiter.clone();
            let ctx = AttemptContext {
                delivery_id: row.id,
                webhook_id: row.webhook_id,
                event_type: row.event_type,
                body,
                attempt_count: row.attempt_count,
                url: row.url,
                secret: row.secret,
            };

            attempts.push(tokio::spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                run_attempt(&pool, &sender, ctx).await;
            }));
        }

        let resumed = attempts.len();
        for attempt in attempts {
            // A panicked attempt task only loses its own outcome write; the
            // row stays due and the next poll retries it.
            if let Err(e) = attempt.await {
                tracing::error!(error = %e, "Delivery attempt task failed");
            }
        }

        Ok(resumed)
    }
}
