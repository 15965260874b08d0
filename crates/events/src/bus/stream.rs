//! Durable event bus backed by a Redis Stream with a consumer group.
//!
//! Events are appended with `XADD` (the stream is kept bounded via
//! approximate `MAXLEN` trimming) and consumed with blocking `XREADGROUP`
//! reads. Within the group, entries are load-balanced across named
//! consumers, so each event is handled by exactly one worker instance.
//!
//! An entry is acknowledged only **after** the handler has durably
//! persisted its delivery rows. A crash (or a store outage surfacing as a
//! handler error) leaves the entry in the group's pending list, from which
//! the periodic pending sweep re-consumes it — this is what makes dispatch
//! at-least-once across restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, EventBus, EventHandler};
use crate::config::BusConfig;
use crate::event::WebhookEvent;

/// Field under which the serialized envelope is stored in a stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// Max entries fetched per `XREADGROUP` call.
const READ_COUNT: usize = 16;

/// Blocking read timeout; also bounds shutdown latency.
const BLOCK_MS: usize = 5_000;

/// Re-scan the pending list every this many read cycles.
const PENDING_SWEEP_CYCLES: u32 = 12;

/// Pause before retrying after a transport error.
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Durable Redis Stream bus.
pub struct RedisStreamBus {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    maxlen: usize,
    cancel: CancellationToken,
    consuming: AtomicBool,
}

impl RedisStreamBus {
    /// Connect to Redis using the given bus configuration.
    ///
    /// The consumer loop started by `subscribe` stops when `cancel` fires;
    /// an attempt already handed to the handler runs to completion.
    pub async fn connect(config: &BusConfig, cancel: CancellationToken) -> Result<Self, BusError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_tokio_connection().await?;

        tracing::info!(
            stream = %config.stream,
            group = %config.group,
            consumer = %config.consumer,
            "Connected to Redis stream bus"
        );

        Ok(Self {
            conn,
            stream: config.stream.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            maxlen: config.stream_maxlen,
            cancel,
            consuming: AtomicBool::new(false),
        })
    }

    /// Create the consumer group if it does not exist yet.
    async fn ensure_group(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let result: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match result {
            Ok(_) => Ok(()),
            // The group already exists — fine, another instance created it.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, event: &WebhookEvent) -> Result<(), BusError> {
        let body = event.to_bytes()?;
        let mut conn = self.conn.clone();

        let _: String = conn
            .xadd_maxlen(
                &self.stream,
                StreamMaxlen::Approx(self.maxlen),
                "*",
                &[(PAYLOAD_FIELD, body)],
            )
            .await?;

        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        if self.consuming.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadySubscribed);
        }

        self.ensure_group().await?;

        let conn = self.conn.clone();
        let stream = self.stream.clone();
        let group = self.group.clone();
        let consumer = self.consumer.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(consume_loop(conn, stream, group, consumer, handler, cancel));

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer loop
// ---------------------------------------------------------------------------

async fn consume_loop(
    mut conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
) {
    tracing::info!(stream = %stream, group = %group, consumer = %consumer, "Stream consumer started");

    let read_opts = StreamReadOptions::default()
        .group(&group, &consumer)
        .count(READ_COUNT)
        .block(BLOCK_MS);
    // Pending reads return immediately; no block.
    let pending_opts = StreamReadOptions::default()
        .group(&group, &consumer)
        .count(READ_COUNT);

    // Start with a sweep so entries orphaned by a previous crash are
    // re-consumed before any new ones.
    let mut cycles_until_sweep = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if cycles_until_sweep == 0 {
            cycles_until_sweep = PENDING_SWEEP_CYCLES;
            match read_batch(conn.clone(), &stream, "0", &pending_opts).await {
                Ok(reply) => {
                    process_reply(&mut conn, &stream, &group, &handler, reply, true).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pending sweep read failed");
                }
            }
        }
        cycles_until_sweep -= 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = read_batch(conn.clone(), &stream, ">", &read_opts) => result,
        };

        match result {
            // An empty reply just means the blocking read timed out.
            Ok(reply) => {
                process_reply(&mut conn, &stream, &group, &handler, reply, false).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Stream read failed, retrying");
                tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
            }
        }
    }

    tracing::info!(stream = %stream, group = %group, "Stream consumer stopped");
}

/// One `XREADGROUP` call on its own connection handle.
async fn read_batch(
    mut conn: MultiplexedConnection,
    stream: &str,
    id: &str,
    opts: &StreamReadOptions,
) -> Result<StreamReadReply, redis::RedisError> {
    conn.xread_options(&[stream], &[id], opts).await
}

async fn process_reply(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    handler: &Arc<dyn EventHandler>,
    reply: StreamReadReply,
    is_sweep: bool,
) {
    for key in reply.keys {
        for entry in key.ids {
            if is_sweep {
                tracing::debug!(entry_id = %entry.id, "Re-consuming pending entry");
            }
            process_entry(conn, stream, group, handler, entry).await;
        }
    }
}

/// Handle one stream entry and decide its acknowledgement.
///
/// Malformed entries are acknowledged and dropped — retrying bytes that do
/// not decode can never succeed. Handler failures leave the entry
/// unacknowledged for the pending sweep.
async fn process_entry(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    handler: &Arc<dyn EventHandler>,
    entry: StreamId,
) {
    let payload: Option<Vec<u8>> = entry.get(PAYLOAD_FIELD);
    let Some(payload) = payload else {
        tracing::warn!(entry_id = %entry.id, "Dropping stream entry without payload field");
        ack(conn, stream, group, &entry.id).await;
        return;
    };

    let event = match WebhookEvent::from_bytes(&payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                entry_id = %entry.id,
                error = %e,
                "Dropping malformed event"
            );
            ack(conn, stream, group, &entry.id).await;
            return;
        }
    };

    match handler.handle(event).await {
        Ok(()) => ack(conn, stream, group, &entry.id).await,
        Err(e) => {
            // No ack: the entry stays pending and will be re-consumed.
            tracing::error!(entry_id = %entry.id, error = %e, "Event handler failed");
        }
    }
}

async fn ack(conn: &mut MultiplexedConnection, stream: &str, group: &str, entry_id: &str) {
    let result: Result<i64, redis::RedisError> = conn.xack(stream, group, &[entry_id]).await;
    if let Err(e) = result {
        tracing::error!(entry_id = %entry_id, error = %e, "Failed to acknowledge stream entry");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // Stream-bus behavior (group creation, ack-after-persist, pending
    // sweep) requires a running Redis instance and is covered by the
    // deployment's integration environment rather than unit tests. The
    // decode-or-drop decision is exercised via `crate::event::tests`.
}
