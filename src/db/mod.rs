//! SQLite persistence for editions, their page records and the claims that
//! keep separate worker processes off the same edition.
//!
//! The repositories borrow a [`SqlitePool`]; callers own the pool and pass
//! it in explicitly.

mod claims;
mod editions;
mod pages;
mod schema;

pub use claims::*;
pub use editions::*;
pub use pages::*;
pub use schema::*;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use tracing::debug;

use crate::error::PipelineError;

/// Create a connection pool and make sure the schema exists.
///
/// In-memory databases get a single connection that never expires, since
/// every new connection would otherwise see its own empty database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, PipelineError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };
    debug!("Connected to {}", database_url);

    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Current time as stored in `created_at` / `updated_at`.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
