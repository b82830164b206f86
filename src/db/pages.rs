//! Page records and the replace-all write path.
//!
//! Pages are never patched one by one during ingestion. A (re)processed
//! edition gets its whole page set swapped in a single transaction, which
//! also updates the declared page count. The only per-row write is the
//! auditor's path rewrite.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::now;
use crate::error::PipelineError;
use crate::pipeline::normalize::{canonicalize, strip_web_root};

/// Page record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub edition_id: i64,
    /// 1-based, contiguous within an edition.
    pub page_number: i64,
    pub image_path: String,
    pub width: i64,
    pub height: i64,
}

/// A page about to be written, after path normalisation and inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageRow {
    image_path: String,
    width: u32,
    height: u32,
}

/// Page repository
pub struct PageRepository<'a> {
    pool: &'a SqlitePool,
    web_root: Option<&'a Path>,
}

impl<'a> PageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            web_root: None,
        }
    }

    /// Store page paths relative to `web_root`. Files handed to
    /// [`replace_pages`](Self::replace_pages) that live under it lose that
    /// prefix before normalisation.
    pub fn with_web_root(mut self, web_root: &'a Path) -> Self {
        self.web_root = Some(web_root);
        self
    }

    /// Replace every page of `edition_id` with `files`, numbered 1..N in
    /// the given order, and set the declared page count to N.
    ///
    /// Unreadable images are stored as 0x0. Fails with
    /// [`PipelineError::NotFound`] if the edition row does not exist, in
    /// which case nothing is written.
    pub async fn replace_pages(
        &self,
        edition_id: i64,
        files: &[PathBuf],
    ) -> Result<usize, PipelineError> {
        let rows = inspect_all(self.web_root.map(Path::to_path_buf), files).await?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE editions SET page_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(rows.len() as i64)
        .bind(now())
        .bind(edition_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(PipelineError::NotFound { edition_id });
        }

        sqlx::query("DELETE FROM pages WHERE edition_id = ?")
            .bind(edition_id)
            .execute(&mut *tx)
            .await?;

        for (idx, row) in rows.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO pages (edition_id, page_number, image_path, width, height)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(edition_id)
            .bind(idx as i64 + 1)
            .bind(&row.image_path)
            .bind(row.width as i64)
            .bind(row.height as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("Edition {}: stored {} pages", edition_id, rows.len());
        Ok(rows.len())
    }

    /// Pages of one edition in page order
    pub async fn list_for_edition(&self, edition_id: i64) -> Result<Vec<Page>, PipelineError> {
        let pages = sqlx::query_as::<_, Page>(
            r#"
            SELECT id, edition_id, page_number, image_path, width, height
            FROM pages
            WHERE edition_id = ?
            ORDER BY page_number
            "#,
        )
        .bind(edition_id)
        .fetch_all(self.pool)
        .await?;

        Ok(pages)
    }

    /// Number of page rows for one edition
    pub async fn count_for_edition(&self, edition_id: i64) -> Result<i64, PipelineError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pages WHERE edition_id = ?")
            .bind(edition_id)
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    /// Rewrite the stored path of a single page.
    pub async fn update_image_path(&self, page_id: i64, path: &str) -> Result<bool, PipelineError> {
        let result = sqlx::query("UPDATE pages SET image_path = ? WHERE id = ?")
            .bind(path)
            .bind(page_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn inspect_all(
    web_root: Option<PathBuf>,
    files: &[PathBuf],
) -> Result<Vec<PageRow>, PipelineError> {
    let files = files.to_vec();
    tokio::task::spawn_blocking(move || {
        files
            .iter()
            .map(|f| inspect(web_root.as_deref(), f))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("page inspection task failed: {e}")))
}

fn inspect(web_root: Option<&Path>, file: &Path) -> PageRow {
    let raw = file.to_string_lossy();
    let relative = match web_root {
        Some(root) => strip_web_root(root, &raw),
        None => raw.into_owned(),
    };
    let image_path = match canonicalize(&relative) {
        Ok(path) => path,
        Err(PipelineError::UnanchoredPath { path }) => {
            warn!("Page '{}' is outside uploads/; storing it as-is", path);
            path
        }
        Err(e) => {
            warn!("Cannot normalise '{}': {}", relative, e);
            relative
        }
    };

    let (width, height) = match image::image_dimensions(file) {
        Ok(dims) => dims,
        Err(e) => {
            warn!("Cannot read dimensions of '{}': {}", file.display(), e);
            (0, 0)
        }
    };

    PageRow {
        image_path,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, EditionRepository, EditionStatus, NewEdition};

    async fn setup() -> (SqlitePool, i64) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let id = EditionRepository::new(&pool)
            .insert(&NewEdition {
                title: "t".into(),
                source_path: Some("uploads/e/edition.pdf".into()),
                status: EditionStatus::Published,
            })
            .await
            .unwrap();
        (pool, id)
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| PathBuf::from(format!("/srv/www/uploads/e/pages/{n}")))
            .collect()
    }

    #[tokio::test]
    async fn replace_leaves_no_residue() {
        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool);

        let n = repo
            .replace_pages(id, &paths(&["a.png", "b.png", "c.png"]))
            .await
            .unwrap();
        assert_eq!(n, 3);

        let n = repo.replace_pages(id, &paths(&["x.png", "y.png"])).await.unwrap();
        assert_eq!(n, 2);

        let pages = repo.list_for_edition(id).await.unwrap();
        let got: Vec<_> = pages
            .iter()
            .map(|p| (p.page_number, p.image_path.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, "uploads/e/pages/x.png"),
                (2, "uploads/e/pages/y.png"),
            ]
        );

        let edition = EditionRepository::new(&pool).get(id).await.unwrap().unwrap();
        assert_eq!(edition.page_count, 2);
    }

    #[tokio::test]
    async fn unreadable_images_get_zero_dimensions() {
        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool);
        repo.replace_pages(id, &paths(&["missing.png"])).await.unwrap();

        let page = &repo.list_for_edition(id).await.unwrap()[0];
        assert_eq!((page.width, page.height), (0, 0));
    }

    #[tokio::test]
    async fn reads_real_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("uploads/e/pages/page_001.png");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        image::RgbImage::new(12, 7).save(&file).unwrap();

        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool);
        repo.replace_pages(id, &[file]).await.unwrap();

        let page = &repo.list_for_edition(id).await.unwrap()[0];
        assert_eq!((page.width, page.height), (12, 7));
        assert_eq!(page.image_path, "uploads/e/pages/page_001.png");
    }

    #[tokio::test]
    async fn web_root_containing_uploads_is_not_the_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let web_root = dir.path().join("uploads/site");
        let file = web_root.join("uploads/e/pages/page_001.png");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        image::RgbImage::new(3, 4).save(&file).unwrap();

        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool).with_web_root(&web_root);
        repo.replace_pages(id, &[file.clone()]).await.unwrap();

        let page = &repo.list_for_edition(id).await.unwrap()[0];
        assert_eq!(page.image_path, "uploads/e/pages/page_001.png");
        assert_eq!((page.width, page.height), (3, 4));
        assert_eq!(web_root.join(&page.image_path), file);
    }

    #[tokio::test]
    async fn unknown_edition_writes_nothing() {
        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool);
        let err = repo
            .replace_pages(id + 1, &paths(&["a.png"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
        assert_eq!(repo.count_for_edition(id + 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_single_path() {
        let (pool, id) = setup().await;
        let repo = PageRepository::new(&pool);
        repo.replace_pages(id, &paths(&["a.png"])).await.unwrap();
        let page = repo.list_for_edition(id).await.unwrap().remove(0);

        assert!(repo.update_image_path(page.id, "uploads/other.png").await.unwrap());
        assert_eq!(
            repo.list_for_edition(id).await.unwrap()[0].image_path,
            "uploads/other.png"
        );
    }
}
