//! The webhook event envelope.
//!
//! [`WebhookEvent`] is transient: it exists on the bus and in memory, never
//! in the database (the delivery audit rows capture a serialized copy at
//! dispatch time). Both bus backends carry the same JSON wire format:
//! `{event_type, user_id, payload, timestamp}` with an RFC 3339 timestamp.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use relay_core::hashing::sha256_hex;
use relay_core::types::{DbId, Timestamp};

/// A domain event destined for webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Dot-separated event name, e.g. `"activity.created"`.
    pub event_type: String,

    /// Id of the user the event concerns.
    pub user_id: DbId,

    /// Opaque JSON payload; never validated by this subsystem.
    pub payload: serde_json::Value,

    /// When the event was produced (UTC).
    pub timestamp: Timestamp,
}

impl WebhookEvent {
    /// Create a new event stamped with the current time.
    pub fn new(event_type: impl Into<String>, user_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            user_id,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize to the bus wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from bus wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Stable dedup key for this event.
    ///
    /// Derived purely from the envelope content, so a redelivered event
    /// (same bytes) maps to the same key. Together with the unique
    /// `(webhook_id, event_key)` index this makes delivery-row creation
    /// idempotent under at-least-once bus semantics.
    pub fn dedup_key(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}",
            self.event_type,
            self.user_id,
            self.timestamp.to_rfc3339(),
            self.payload
        );
        sha256_hex(material.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
