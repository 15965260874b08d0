//! Relay database layer.
//!
//! Provides the PostgreSQL connection pool, embedded migrations, and the
//! repository structs for the webhook registry and the delivery audit
//! store. Repositories are zero-sized structs whose async methods take
//! `&PgPool` as the first argument.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

/// Shared PostgreSQL connection pool type.
pub type DbPool = sqlx::PgPool;

/// Embedded migrations, applied by the worker binary at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../db/migrations");

/// Default maximum pool connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connect to PostgreSQL using the given database URL.
///
/// Pool size can be overridden via `DATABASE_MAX_CONNECTIONS`.
pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONNECTIONS);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Verify the database connection is alive.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
