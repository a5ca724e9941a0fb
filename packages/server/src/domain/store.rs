//! The per-run result store: a SQLite file holding `run_items`, with
//! schema migrations applied on open.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

#[derive(Debug, Clone, FromRow)]
pub struct RunResultRow {
    pub id: i64,
    pub run_id: String,
    pub query_id: Option<String>,
    pub query_text: String,
    pub domain: String,
    pub search_query: String,
    pub title: String,
    pub snippet: String,
    pub raw_url: String,
    pub final_url: String,
    pub raw_html_path: Option<String>,
    pub visible_text: Option<String>,
    pub fetch_error: Option<String>,
    pub extract_error: Option<String>,
    pub normalization_error: Option<String>,
    pub normalized_url: Option<String>,
    pub cache_key: Option<String>,
    pub cached_at: Option<String>,
    pub cache_expires_at: Option<String>,
    pub last_seen_at: String,
    pub skip_reason: Option<String>,
    pub canonical_id: Option<i64>,
    pub is_duplicate: bool,
    pub is_hidden: bool,
    pub duplicate_count: i64,
    pub relevance_score: Option<f64>,
    pub scored_at: Option<String>,
    pub score_version: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row staged for the batch insert at the end of ingestion.
#[derive(Debug, Clone, Default)]
pub struct NewRunResult {
    pub run_id: String,
    pub query_id: Option<String>,
    pub query_text: String,
    pub domain: String,
    pub search_query: String,
    pub title: String,
    pub snippet: String,
    pub raw_url: String,
    pub final_url: String,
    pub raw_html_path: Option<String>,
    pub visible_text: Option<String>,
    pub fetch_error: Option<String>,
    pub extract_error: Option<String>,
    pub normalization_error: Option<String>,
    pub normalized_url: Option<String>,
    pub cache_key: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub cache_expires_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub skip_reason: Option<String>,
}

pub struct ResultStore {
    pool: SqlitePool,
}

impl ResultStore {
    pub async fn open(path: &Path) -> sqlx::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> sqlx::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                query_id TEXT,
                query_text TEXT NOT NULL,
                domain TEXT NOT NULL,
                search_query TEXT NOT NULL,
                title TEXT NOT NULL,
                snippet TEXT NOT NULL,
                raw_url TEXT NOT NULL,
                final_url TEXT NOT NULL,
                raw_html_path TEXT,
                visible_text TEXT,
                fetch_error TEXT,
                extract_error TEXT,
                normalization_error TEXT,
                normalized_url TEXT,
                cache_key TEXT,
                cached_at TEXT,
                cache_expires_at TEXT,
                last_seen_at TEXT NOT NULL,
                skip_reason TEXT,
                canonical_id INTEGER,
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                duplicate_count INTEGER NOT NULL DEFAULT 0,
                relevance_score REAL,
                scored_at TEXT,
                score_version TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_items__run_id ON run_items(run_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_run_items__cache_key ON run_items(cache_key)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_run_items__normalized_url ON run_items(normalized_url)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes all staged rows for one run in a single transaction.
    pub async fn insert_batch(&self, rows: &[NewRunResult]) -> sqlx::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = crate::domain::now_rfc3339();
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO run_items (
                    run_id, query_id, query_text, domain, search_query, title, snippet,
                    raw_url, final_url, raw_html_path, visible_text, fetch_error,
                    extract_error, normalization_error, normalized_url, cache_key,
                    cached_at, cache_expires_at, last_seen_at, skip_reason,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.run_id)
            .bind(&row.query_id)
            .bind(&row.query_text)
            .bind(&row.domain)
            .bind(&row.search_query)
            .bind(&row.title)
            .bind(&row.snippet)
            .bind(&row.raw_url)
            .bind(&row.final_url)
            .bind(&row.raw_html_path)
            .bind(&row.visible_text)
            .bind(&row.fetch_error)
            .bind(&row.extract_error)
            .bind(&row.normalization_error)
            .bind(&row.normalized_url)
            .bind(&row.cache_key)
            .bind(row.cached_at.map(|t| t.to_rfc3339()))
            .bind(row.cache_expires_at.map(|t| t.to_rfc3339()))
            .bind(row.last_seen_at.to_rfc3339())
            .bind(&row.skip_reason)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    pub async fn fetch_run_rows(&self, run_id: &str) -> sqlx::Result<Vec<RunResultRow>> {
        sqlx::query_as::<_, RunResultRow>("SELECT * FROM run_items WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn apply_dedupe_decision(
        &self,
        decision: &jobato_core::DedupeDecision,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE run_items
            SET is_duplicate = ?, is_hidden = ?, canonical_id = ?,
                duplicate_count = COALESCE(?, duplicate_count)
            WHERE id = ?
            "#,
        )
        .bind(decision.is_duplicate)
        .bind(decision.is_hidden)
        .bind(decision.canonical_id)
        .bind(decision.duplicate_count)
        .bind(decision.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn apply_score(
        &self,
        id: i64,
        score: f64,
        score_version: &str,
        scored_at: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE run_items SET relevance_score = ?, scored_at = ?, score_version = ? WHERE id = ?",
        )
        .bind(score)
        .bind(scored_at.to_rfc3339())
        .bind(score_version)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_batch_persists_rows_for_one_run() {
        let store = ResultStore::in_memory().await.unwrap();
        let row = NewRunResult {
            run_id: "run-1".to_string(),
            query_text: "engineer".to_string(),
            domain: "example.com".to_string(),
            search_query: "site:example.com engineer".to_string(),
            title: "Job".to_string(),
            snippet: "snippet".to_string(),
            raw_url: "https://example.com/a".to_string(),
            final_url: "https://example.com/a".to_string(),
            last_seen_at: Utc::now(),
            ..Default::default()
        };
        store.insert_batch(&[row]).await.unwrap();
        let rows = store.fetch_run_rows("run-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].domain, "example.com");
    }
}
