//! Per-edition mutual exclusion.
//!
//! Ingestion replaces an edition's page set with delete-then-insert, and the
//! auditor rewrites individual page paths. Both take the edition's lock so
//! they never interleave for the same id; different editions proceed in
//! parallel.
//!
//! The lock has two layers. [`EditionLocks::lock`] serialises tasks inside
//! this process. [`EditionLocks::acquire`] additionally claims the edition
//! in the shared database (see [`ClaimRepository`]) so that a second worker
//! process gets [`PipelineError::Busy`] instead of converting the same
//! edition at the same time.

use crate::db::ClaimRepository;
use crate::error::PipelineError;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

type Slot = Arc<tokio::sync::Mutex<()>>;

static REGISTRIES: AtomicU64 = AtomicU64::new(0);

/// Shared registry of per-edition locks. Cheap to clone.
#[derive(Clone)]
pub struct EditionLocks {
    slots: Arc<Mutex<HashMap<i64, Slot>>>,
    owner: Arc<str>,
}

impl EditionLocks {
    pub fn new() -> Self {
        let started = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = REGISTRIES.fetch_add(1, Ordering::Relaxed);
        Self {
            slots: Arc::default(),
            owner: format!("pid{}-{:x}-{}", std::process::id(), started, seq).into(),
        }
    }

    /// Name written into database claims taken through this registry.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Wait for exclusive access to `edition_id` within this process.
    pub async fn lock(&self, edition_id: i64) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            // Drop slots nobody holds or waits on.
            slots.retain(|_, s| Arc::strong_count(s) > 1);
            slots.entry(edition_id).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Try to take the in-process lock without waiting.
    pub fn try_lock(&self, edition_id: i64) -> Option<OwnedMutexGuard<()>> {
        let slot = self.slots.lock().entry(edition_id).or_default().clone();
        slot.try_lock_owned().ok()
    }

    /// Take the in-process lock, then claim `edition_id` in the database.
    ///
    /// Fails with [`PipelineError::Busy`] when another process holds a claim
    /// younger than `ttl`. The returned guard must be given back through
    /// [`EditionGuard::release`]; a guard that is only dropped leaves its
    /// claim to expire.
    pub async fn acquire(
        &self,
        pool: &SqlitePool,
        edition_id: i64,
        ttl: Duration,
    ) -> Result<EditionGuard, PipelineError> {
        let local = self.lock(edition_id).await;
        let claims = ClaimRepository::new(pool);
        if !claims.try_claim(edition_id, &self.owner, ttl).await? {
            let owner = claims.holder(edition_id).await?.unwrap_or_default();
            return Err(PipelineError::Busy { edition_id, owner });
        }
        Ok(EditionGuard {
            pool: pool.clone(),
            edition_id,
            owner: self.owner.clone(),
            _local: local,
        })
    }
}

impl Default for EditionLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EditionLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditionLocks")
            .field("owner", &self.owner)
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

/// Exclusive hold on one edition, in this process and in the database.
pub struct EditionGuard {
    pool: SqlitePool,
    edition_id: i64,
    owner: Arc<str>,
    _local: OwnedMutexGuard<()>,
}

impl EditionGuard {
    pub fn edition_id(&self) -> i64 {
        self.edition_id
    }

    /// Drop the database claim, then the in-process lock.
    pub async fn release(self) {
        if let Err(e) = ClaimRepository::new(&self.pool)
            .release(self.edition_id, &self.owner)
            .await
        {
            warn!("Edition {}: cannot release claim: {}", self.edition_id, e);
        }
    }
}

impl std::fmt::Debug for EditionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditionGuard")
            .field("edition_id", &self.edition_id)
            .field("owner", &self.owner)
            .finish()
    }
}
