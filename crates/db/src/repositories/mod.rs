//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod delivery_repo;
pub mod webhook_repo;

pub use delivery_repo::DeliveryRepo;
pub use webhook_repo::WebhookRepo;
