//! Core error type shared across the workspace.

use crate::types::DbId;

/// Errors produced by core domain logic.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A value failed domain validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An entity referenced by id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },
}
