//! Relay webhook event-delivery subsystem.
//!
//! This crate moves domain events from producers to user-registered HTTP
//! endpoints with at-least-once semantics:
//!
//! - [`WebhookEvent`] — the transient event envelope carried on the bus.
//! - [`bus`] — the transport abstraction with two backends: the durable
//!   [`RedisStreamBus`] (consumer-group semantics, production) and the
//!   best-effort in-process [`MemoryBus`] (development/tests).
//! - [`Dispatcher`] — consumes events, persists one delivery row per
//!   matching registration, and launches independent delivery attempts.
//! - [`RetryWorker`] — periodically resumes persisted deliveries that are
//!   due for another attempt, using the same attempt logic.
//! - [`DeliverySender`] — the signed HTTP POST shared by both.

pub mod bus;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod event;
pub mod retry;

pub use bus::memory::MemoryBus;
pub use bus::stream::RedisStreamBus;
pub use bus::{BusError, EventBus, EventHandler};
pub use config::{BusBackend, BusConfig, DeliveryConfig, RetryConfig};
pub use delivery::DeliverySender;
pub use dispatcher::Dispatcher;
pub use event::WebhookEvent;
pub use retry::RetryWorker;
