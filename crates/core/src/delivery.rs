//! Delivery status state machine and shared delivery constants.
//!
//! A `webhook_deliveries` row moves through these states:
//!
//! ```text
//! pending --success--> succeeded                       (terminal)
//! pending --failure--> failed                          (attempts < max)
//! failed  --success--> succeeded                       (terminal)
//! failed  --failure--> failed                          (attempts < max)
//! failed  --failure--> exhausted                       (attempts == max, terminal)
//! ```
//!
//! No transition leaves `succeeded` or `exhausted`; the repository layer
//! guards every update with `status IN ('pending','failed')`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum attempts per delivery before it is exhausted.
pub const DEFAULT_MAX_ATTEMPTS: i16 = 5;

/// Fixed per-attempt HTTP timeout in seconds.
pub const DELIVERY_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a single webhook delivery row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, first attempt not yet resolved.
    Pending,
    /// The remote endpoint answered with a 2xx status.
    Succeeded,
    /// The last attempt failed; another attempt is scheduled.
    Failed,
    /// All attempts used up without success.
    Exhausted,
}

impl DeliveryStatus {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(CoreError::Validation(format!(
                "Invalid delivery status: '{s}'. Must be one of: pending, succeeded, failed, exhausted"
            ))),
        }
    }

    /// Whether the row is immutable (audit trail, never retried again).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
