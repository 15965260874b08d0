//! Environment-driven configuration for the event subsystem.
//!
//! All knobs have defaults suitable for local development; production
//! deployments override via environment variables.

use relay_core::error::CoreError;

// ---------------------------------------------------------------------------
// BusBackend
// ---------------------------------------------------------------------------

/// Which bus transport to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// In-process buffered channel; best effort, dev/tests only.
    Memory,
    /// Durable Redis Stream with consumer-group semantics.
    Redis,
}

impl BusBackend {
    /// Parse from the `BUS_BACKEND` value.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(CoreError::Validation(format!(
                "Invalid bus backend: '{s}'. Must be one of: memory, redis"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Default Redis connection URL.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default stream key and consumer group.
const DEFAULT_STREAM: &str = "relay:webhook-events";
const DEFAULT_GROUP: &str = "webhook-dispatch";

/// Default approximate stream trim length.
const DEFAULT_STREAM_MAXLEN: usize = 10_000;

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Selected transport (default: `memory`).
    pub backend: BusBackend,
    /// Redis connection URL (redis backend only).
    pub redis_url: String,
    /// Stream key events are appended to.
    pub stream: String,
    /// Consumer group name.
    pub group: String,
    /// This instance's consumer name within the group.
    pub consumer: String,
    /// Approximate `MAXLEN` the stream is trimmed to on publish.
    pub stream_maxlen: usize,
}

impl BusConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                   |
    /// |-------------------------|---------------------------|
    /// | `BUS_BACKEND`           | `memory`                  |
    /// | `REDIS_URL`             | `redis://127.0.0.1:6379`  |
    /// | `WEBHOOK_STREAM`        | `relay:webhook-events`    |
    /// | `WEBHOOK_STREAM_GROUP`  | `webhook-dispatch`        |
    /// | `WEBHOOK_CONSUMER`      | `$HOSTNAME` or `worker-1` |
    /// | `WEBHOOK_STREAM_MAXLEN` | `10000`                   |
    pub fn from_env() -> Result<Self, CoreError> {
        let backend = match std::env::var("BUS_BACKEND") {
            Ok(value) => BusBackend::from_str(&value)?,
            Err(_) => BusBackend::Memory,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| DEFAULT_REDIS_URL.into()),
            stream: std::env::var("WEBHOOK_STREAM")
                .unwrap_or_else(|_| DEFAULT_STREAM.into()),
            group: std::env::var("WEBHOOK_STREAM_GROUP")
                .unwrap_or_else(|_| DEFAULT_GROUP.into()),
            consumer: std::env::var("WEBHOOK_CONSUMER")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "worker-1".into()),
            stream_maxlen: std::env::var("WEBHOOK_STREAM_MAXLEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_STREAM_MAXLEN),
        })
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Default retry poll interval. Deliberately much shorter than the minimum
/// backoff step, so no due row waits longer than one interval.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default due-row batch size per poll.
const DEFAULT_BATCH_SIZE: i64 = 100;

/// Retry worker configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Seconds between due-row scans (default: `30`).
    pub poll_interval_secs: u64,
    /// Maximum rows resumed per scan (default: `100`).
    pub batch_size: i64,
}

impl RetryConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `RETRY_POLL_INTERVAL_SECS` | `30`    |
    /// | `RETRY_BATCH_SIZE`         | `100`   |
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: std::env::var("RETRY_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: std::env::var("RETRY_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryConfig
// ---------------------------------------------------------------------------

/// Default cap on concurrent in-flight delivery attempts.
const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Delivery fan-out configuration.
///
/// The cap is enforced by one semaphore shared between the dispatcher and
/// the retry worker, so an event storm cannot open unbounded outbound
/// connections.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Maximum concurrent delivery attempts (default: `64`).
    pub max_in_flight: usize,
}

impl DeliveryConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `MAX_IN_FLIGHT_DELIVERIES` | `64`    |
    pub fn from_env() -> Self {
        Self {
            max_in_flight: std::env::var("MAX_IN_FLIGHT_DELIVERIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
