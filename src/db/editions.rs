//! Edition records

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;

use super::now;
use crate::error::PipelineError;

/// Publication state, owned by administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EditionStatus {
    Draft,
    Published,
    Archived,
}

impl fmt::Display for EditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EditionStatus::Draft => "draft",
            EditionStatus::Published => "published",
            EditionStatus::Archived => "archived",
        })
    }
}

/// Edition record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Edition {
    pub id: i64,
    pub title: String,
    pub source_path: Option<String>,
    pub status: EditionStatus,
    /// Declared page count. The page rows are the source of truth.
    pub page_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Values for a new edition, as written by the upload workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEdition {
    pub title: String,
    pub source_path: Option<String>,
    pub status: EditionStatus,
}

/// Edition repository
pub struct EditionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EditionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an edition and return its id
    pub async fn insert(&self, edition: &NewEdition) -> Result<i64, PipelineError> {
        let now = now();
        let result = sqlx::query(
            r#"
            INSERT INTO editions (title, source_path, status, page_count, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&edition.title)
        .bind(&edition.source_path)
        .bind(edition.status)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get one edition
    pub async fn get(&self, id: i64) -> Result<Option<Edition>, PipelineError> {
        let edition = sqlx::query_as::<_, Edition>(
            r#"
            SELECT id, title, source_path, status, page_count, created_at, updated_at
            FROM editions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(edition)
    }

    /// All editions, oldest first
    pub async fn list(&self) -> Result<Vec<Edition>, PipelineError> {
        let editions = sqlx::query_as::<_, Edition>(
            r#"
            SELECT id, title, source_path, status, page_count, created_at, updated_at
            FROM editions
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(editions)
    }

    /// Draft or published editions with a source document and no page rows.
    pub async fn find_unprocessed(&self) -> Result<Vec<i64>, PipelineError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT e.id
            FROM editions e
            LEFT JOIN pages p ON p.edition_id = e.id
            WHERE e.status IN ('draft', 'published')
              AND e.source_path IS NOT NULL
              AND TRIM(e.source_path) <> ''
              AND p.id IS NULL
            ORDER BY e.id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }

    /// Overwrite the declared page count
    pub async fn set_page_count(&self, id: i64, count: i64) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE editions SET page_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(count)
        .bind(now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change publication status
    pub async fn set_status(&self, id: i64, status: EditionStatus) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE editions SET status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn pool() -> SqlitePool {
        create_pool("sqlite::memory:").await.unwrap()
    }

    fn new_edition(title: &str, source: Option<&str>, status: EditionStatus) -> NewEdition {
        NewEdition {
            title: title.into(),
            source_path: source.map(Into::into),
            status,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let pool = pool().await;
        let repo = EditionRepository::new(&pool);
        let id = repo
            .insert(&new_edition("Morning", Some("uploads/a/e.pdf"), EditionStatus::Published))
            .await
            .unwrap();

        let e = repo.get(id).await.unwrap().unwrap();
        assert_eq!(e.title, "Morning");
        assert_eq!(e.status, EditionStatus::Published);
        assert_eq!(e.page_count, 0);
        assert!(repo.get(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unprocessed_filters_status_and_source() {
        let pool = pool().await;
        let repo = EditionRepository::new(&pool);
        let draft = repo
            .insert(&new_edition("d", Some("uploads/d.pdf"), EditionStatus::Draft))
            .await
            .unwrap();
        let published = repo
            .insert(&new_edition("p", Some("uploads/p.pdf"), EditionStatus::Published))
            .await
            .unwrap();
        repo.insert(&new_edition("a", Some("uploads/a.pdf"), EditionStatus::Archived))
            .await
            .unwrap();
        repo.insert(&new_edition("n", None, EditionStatus::Published))
            .await
            .unwrap();
        repo.insert(&new_edition("b", Some("  "), EditionStatus::Draft))
            .await
            .unwrap();

        assert_eq!(repo.find_unprocessed().await.unwrap(), vec![draft, published]);
    }

    #[tokio::test]
    async fn set_status_and_count() {
        let pool = pool().await;
        let repo = EditionRepository::new(&pool);
        let id = repo
            .insert(&new_edition("x", None, EditionStatus::Draft))
            .await
            .unwrap();

        assert!(repo.set_status(id, EditionStatus::Archived).await.unwrap());
        assert!(repo.set_page_count(id, 12).await.unwrap());
        assert!(!repo.set_page_count(id + 1, 3).await.unwrap());

        let e = repo.get(id).await.unwrap().unwrap();
        assert_eq!(e.status, EditionStatus::Archived);
        assert_eq!(e.page_count, 12);
        assert_eq!(e.status.to_string(), "archived");
    }
}
