//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::PipelineError;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), PipelineError> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Editions: one uploaded document, written by the upload/admin workflow
CREATE TABLE IF NOT EXISTS editions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    source_path TEXT,
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK (status IN ('draft', 'published', 'archived')),
    page_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_editions_status ON editions(status);

-- Pages: replaced as a whole batch per edition
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    edition_id INTEGER NOT NULL REFERENCES editions(id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL CHECK (page_number >= 1),
    image_path TEXT NOT NULL,
    width INTEGER NOT NULL DEFAULT 0,
    height INTEGER NOT NULL DEFAULT 0,

    UNIQUE(edition_id, page_number)
);

CREATE INDEX IF NOT EXISTS idx_pages_edition_id ON pages(edition_id);

-- Claims: which worker process currently writes an edition
CREATE TABLE IF NOT EXISTS edition_claims (
    edition_id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL,
    claimed_at INTEGER NOT NULL
);
"#;
