//! Row models and DTOs.

pub mod webhook;

pub use webhook::{CreateRegistration, DueDelivery, WebhookDelivery, WebhookRegistration};
