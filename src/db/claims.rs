//! Edition claims
//!
//! [`EditionLocks`](crate::lock::EditionLocks) only serialise work inside
//! one process. Worker processes that share a database (a manual `process`
//! next to a scheduled `audit --reprocess`) also claim the edition with a
//! row here before writing to it. A claim older than its time to live is
//! treated as abandoned and may be taken over.

use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;

use crate::error::PipelineError;

/// Claim repository
pub struct ClaimRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ClaimRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim `edition_id` for `owner`.
    ///
    /// Succeeds when no claim exists, when `owner` already holds it, or when
    /// the current claim is older than `ttl`. Returns `false` otherwise.
    pub async fn try_claim(
        &self,
        edition_id: i64,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, PipelineError> {
        let now = chrono::Utc::now().timestamp();
        let stale_before = now - ttl.as_secs() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO edition_claims (edition_id, owner, claimed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(edition_id) DO UPDATE
                SET owner = excluded.owner, claimed_at = excluded.claimed_at
                WHERE edition_claims.owner = excluded.owner
                   OR edition_claims.claimed_at < ?
            "#,
        )
        .bind(edition_id)
        .bind(owner)
        .bind(now)
        .bind(stale_before)
        .execute(self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;
        debug!(
            "Edition {}: claim by {} {}",
            edition_id,
            owner,
            if claimed { "granted" } else { "refused" }
        );
        Ok(claimed)
    }

    /// Drop the claim on `edition_id` if `owner` still holds it.
    pub async fn release(&self, edition_id: i64, owner: &str) -> Result<bool, PipelineError> {
        let result = sqlx::query("DELETE FROM edition_claims WHERE edition_id = ? AND owner = ?")
            .bind(edition_id)
            .bind(owner)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Current holder of the claim on `edition_id`
    pub async fn holder(&self, edition_id: i64) -> Result<Option<String>, PipelineError> {
        let owner =
            sqlx::query_scalar::<_, String>("SELECT owner FROM edition_claims WHERE edition_id = ?")
                .bind(edition_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(owner)
    }
}
