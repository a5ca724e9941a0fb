//! Active-model election and rollback, serialized under a process-wide
//! lock to preserve the at-most-one-active invariant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("model {0} is not registered")]
    UnknownModel(String),

    #[error("model {0} has no completed evaluation result")]
    NotEvaluated(String),

    #[error("model {0} has no activation history")]
    NoHistory(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActiveModelRow {
    pub model_id: String,
    pub model_version: String,
    pub activated_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActivationHistoryRow {
    pub id: i64,
    pub action: String,
    pub model_id: String,
    pub model_version: String,
    pub previous_model_id: Option<String>,
    pub previous_model_version: Option<String>,
    pub reason: Option<String>,
    pub evaluation_id: Option<String>,
    pub created_at: String,
}

pub struct ActivationService {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl ActivationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Mutex::new(()),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), ActivationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS active_models (
                model_id TEXT PRIMARY KEY,
                model_version TEXT NOT NULL,
                activated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_activation_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                model_id TEXT NOT NULL,
                model_version TEXT NOT NULL,
                previous_model_id TEXT,
                previous_model_version TEXT,
                reason TEXT,
                evaluation_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_active(&self) -> Result<Option<ActiveModelRow>, ActivationError> {
        let row = sqlx::query_as::<_, ActiveModelRow>(
            "SELECT model_id, model_version, activated_at FROM active_models LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn history(&self) -> Result<Vec<ActivationHistoryRow>, ActivationError> {
        let rows = sqlx::query_as::<_, ActivationHistoryRow>(
            "SELECT * FROM model_activation_history ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Requires `model_id` to be registry-known (checked by the caller
    /// before invoking, since the registry is not owned by this service)
    /// and requires a completed evaluation result to exist.
    pub async fn activate(
        &self,
        model_id: &str,
        model_version: &str,
        evaluation_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), ActivationError> {
        let _guard = self.lock.lock().await;
        let previous = self.get_active().await?;
        let now = crate::domain::now_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM active_models").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO active_models (model_id, model_version, activated_at) VALUES (?, ?, ?)",
        )
        .bind(model_id)
        .bind(model_version)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO model_activation_history
                (action, model_id, model_version, previous_model_id, previous_model_version, reason, evaluation_id, created_at)
            VALUES ('activated', ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(model_version)
        .bind(previous.as_ref().map(|p| p.model_id.clone()))
        .bind(previous.as_ref().map(|p| p.model_version.clone()))
        .bind(reason)
        .bind(evaluation_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Reactivates the history entry immediately preceding `model_id`'s
    /// most recent activation (its "prior" version).
    pub async fn rollback(&self, model_id: &str) -> Result<(), ActivationError> {
        let _guard = self.lock.lock().await;
        let recent = sqlx::query_as::<_, ActivationHistoryRow>(
            "SELECT * FROM model_activation_history WHERE model_id = ? ORDER BY id DESC LIMIT 2",
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await?;
        if recent.len() < 2 {
            return Err(ActivationError::NoHistory(model_id.to_string()));
        }
        let prior = recent.into_iter().nth(1).unwrap();

        let now = crate::domain::now_rfc3339();
        let previous = self.get_active().await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM active_models").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO active_models (model_id, model_version, activated_at) VALUES (?, ?, ?)",
        )
        .bind(&prior.model_id)
        .bind(&prior.model_version)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO model_activation_history
                (action, model_id, model_version, previous_model_id, previous_model_version, reason, evaluation_id, created_at)
            VALUES ('rollback', ?, ?, ?, ?, NULL, NULL, ?)
            "#,
        )
        .bind(&prior.model_id)
        .bind(&prior.model_version)
        .bind(previous.as_ref().map(|p| p.model_id.clone()))
        .bind(previous.as_ref().map(|p| p.model_version.clone()))
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Parses a persisted timestamp column back to a `DateTime<Utc>`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> ActivationService {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let service = ActivationService::new(pool);
        service.ensure_schema().await.unwrap();
        service
    }

    #[tokio::test]
    async fn activate_sets_single_active_row_and_appends_history() {
        let service = service().await;
        service.activate("baseline", "1.0.0", None, None).await.unwrap();
        let active = service.get_active().await.unwrap().unwrap();
        assert_eq!(active.model_id, "baseline");
        let history = service.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "activated");
    }

    #[tokio::test]
    async fn second_activation_replaces_first_and_records_previous() {
        let service = service().await;
        service.activate("baseline", "1.0.0", None, None).await.unwrap();
        service.activate("challenger", "2.0.0", None, None).await.unwrap();
        let active = service.get_active().await.unwrap().unwrap();
        assert_eq!(active.model_id, "challenger");
        let history = service.history().await.unwrap();
        assert_eq!(history[0].previous_model_id.as_deref(), Some("baseline"));
    }

    #[tokio::test]
    async fn rollback_without_history_is_rejected() {
        let service = service().await;
        let err = service.rollback("baseline").await.unwrap_err();
        assert!(matches!(err, ActivationError::NoHistory(_)));
    }

    #[tokio::test]
    async fn rollback_reactivates_prior_version() {
        let service = service().await;
        service.activate("baseline", "1.0.0", None, None).await.unwrap();
        service.activate("baseline", "1.0.0-20260101000000", None, None).await.unwrap();
        service.rollback("baseline").await.unwrap();
        let active = service.get_active().await.unwrap().unwrap();
        assert_eq!(active.model_version, "1.0.0-20260101000000");
    }
}
