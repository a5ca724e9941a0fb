//! Evaluation engine: scores every registered model against a dataset
//! snapshot via a bounded async worker pool, persisting one result row
//! per (run, model-id, model-version).

use std::sync::Arc;

use jobato_core::{calculate_metrics, FeatureRow, Metrics, Model};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Semaphore;

use crate::domain::registry::ModelRegistry;
use crate::domain::store::RunResultRow;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct EvaluationDataset {
    pub dataset_id: String,
    pub features: Vec<FeatureRow>,
    pub labels: Vec<f64>,
}

/// Dataset from the current run's non-duplicate, scored rows, or a
/// two-row synthetic fallback when none are available.
pub fn build_dataset(db_filename: &str, rows: &[RunResultRow]) -> EvaluationDataset {
    let scored: Vec<&RunResultRow> = rows
        .iter()
        .filter(|r| !r.is_duplicate && r.relevance_score.is_some())
        .collect();

    if scored.is_empty() {
        return EvaluationDataset {
            dataset_id: "synthetic-default".to_string(),
            features: vec![
                FeatureRow {
                    title: "Senior Software Engineer".to_string(),
                    snippet: "Remote full-time role".to_string(),
                    domain: "example.com".to_string(),
                },
                FeatureRow {
                    title: "Unrelated Listing".to_string(),
                    snippet: "Not a match".to_string(),
                    domain: "example.org".to_string(),
                },
            ],
            labels: vec![1.0, 0.0],
        };
    }

    let features = scored
        .iter()
        .map(|r| FeatureRow {
            title: r.title.clone(),
            snippet: r.snippet.clone(),
            domain: r.domain.clone(),
        })
        .collect();
    let labels = scored
        .iter()
        .map(|r| if r.relevance_score.unwrap_or(0.0) > 0.0 { 1.0 } else { 0.0 })
        .collect();

    EvaluationDataset {
        dataset_id: format!("{}:{}", db_filename, scored.len()),
        features,
        labels,
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EvaluationRunRow {
    pub id: String,
    pub dataset_id: String,
    pub worker_count: i64,
    pub total_models: i64,
    pub completed_models: i64,
    pub failed_models: i64,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EvaluationResultRow {
    pub run_id: String,
    pub model_id: String,
    pub model_version: String,
    pub status: String,
    pub metrics_json: String,
    pub error: Option<String>,
    pub duration_ms: i64,
}

pub struct EvaluationEngine {
    pool: SqlitePool,
}

impl EvaluationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), EvaluationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evaluation_runs (
                id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL,
                worker_count INTEGER NOT NULL,
                total_models INTEGER NOT NULL,
                completed_models INTEGER NOT NULL DEFAULT 0,
                failed_models INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evaluation_results (
                run_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                model_version TEXT NOT NULL,
                status TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                PRIMARY KEY (run_id, model_id, model_version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<EvaluationRunRow>, EvaluationError> {
        let row = sqlx::query_as::<_, EvaluationRunRow>("SELECT * FROM evaluation_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_results(&self, run_id: &str) -> Result<Vec<EvaluationResultRow>, EvaluationError> {
        let rows = sqlx::query_as::<_, EvaluationResultRow>(
            "SELECT * FROM evaluation_results WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Dispatches one job per registered model over a worker pool bounded
    /// to `worker_count` in-flight `fit`/`predict` calls.
    pub async fn run(
        &self,
        run_id: &str,
        registry: &ModelRegistry,
        dataset: &EvaluationDataset,
        worker_count: u32,
    ) -> Result<(), EvaluationError> {
        let models: Vec<(String, String)> = registry
            .get_available_models()
            .map(|e| (e.config.identifier.clone(), e.config.version.clone()))
            .collect();

        let now = crate::domain::now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO evaluation_runs (id, dataset_id, worker_count, total_models, completed_models, failed_models, status, started_at)
            VALUES (?, ?, ?, ?, 0, 0, 'running', ?)
            "#,
        )
        .bind(run_id)
        .bind(&dataset.dataset_id)
        .bind(worker_count as i64)
        .bind(models.len() as i64)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let semaphore = Arc::new(Semaphore::new(worker_count.max(1) as usize));
        let mut handles = Vec::new();

        for (identifier, _version) in &models {
            let Some(entry) = registry.get_model(identifier) else {
                continue;
            };
            let model = entry.model.clone();
            let features = dataset.features.clone();
            let labels = dataset.labels.clone();
            let semaphore = Arc::clone(&semaphore);
            let identifier = identifier.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                let started = std::time::Instant::now();
                let result = tokio::task::spawn_blocking(move || evaluate_one(model, &features, &labels))
                    .await
                    .unwrap_or_else(|join_err| Err(join_err.to_string()));
                (identifier, result, started.elapsed().as_millis() as i64)
            });
            handles.push(handle);
        }

        let mut completed = 0i64;
        let mut failed = 0i64;

        for handle in handles {
            let (identifier, result, duration_ms) = handle.await.unwrap_or_else(|e| {
                ("unknown".to_string(), Err(e.to_string()), 0)
            });
            let entry = registry.get_model(&identifier);
            let model_version = entry.map(|e| e.config.version.clone()).unwrap_or_default();

            match result {
                Ok(metrics) => {
                    completed += 1;
                    let metrics_json = serde_json::json!({
                        "precision": metrics.precision,
                        "recall": metrics.recall,
                        "f1": metrics.f1,
                        "accuracy": metrics.accuracy,
                    })
                    .to_string();
                    sqlx::query(
                        r#"
                        INSERT INTO evaluation_results (run_id, model_id, model_version, status, metrics_json, error, duration_ms)
                        VALUES (?, ?, ?, 'completed', ?, NULL, ?)
                        ON CONFLICT(run_id, model_id, model_version) DO UPDATE SET
                            status = excluded.status, metrics_json = excluded.metrics_json,
                            error = excluded.error, duration_ms = excluded.duration_ms
                        "#,
                    )
                    .bind(run_id)
                    .bind(&identifier)
                    .bind(&model_version)
                    .bind(&metrics_json)
                    .bind(duration_ms)
                    .execute(&self.pool)
                    .await?;
                }
                Err(err) => {
                    failed += 1;
                    sqlx::query(
                        r#"
                        INSERT INTO evaluation_results (run_id, model_id, model_version, status, metrics_json, error, duration_ms)
                        VALUES (?, ?, ?, 'failed', '{}', ?, ?)
                        ON CONFLICT(run_id, model_id, model_version) DO UPDATE SET
                            status = excluded.status, metrics_json = excluded.metrics_json,
                            error = excluded.error, duration_ms = excluded.duration_ms
                        "#,
                    )
                    .bind(run_id)
                    .bind(&identifier)
                    .bind(&model_version)
                    .bind(&err)
                    .bind(duration_ms)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        let status = if failed == 0 { "completed" } else { "partial_failed" };
        sqlx::query(
            "UPDATE evaluation_runs SET completed_models = ?, failed_models = ?, status = ?, completed_at = ? WHERE id = ?",
        )
        .bind(completed)
        .bind(failed)
        .bind(status)
        .bind(crate::domain::now_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn evaluate_one(
    mut model: jobato_core::BuiltinModel,
    features: &[FeatureRow],
    labels: &[f64],
) -> Result<Metrics, String> {
    model.fit(features, labels).map_err(|e| e.to_string())?;
    let predictions = model.predict(features).map_err(|e| e.to_string())?;
    let binary: Vec<f64> = predictions.iter().map(|p| jobato_core::to_binary_prediction(*p)).collect();
    calculate_metrics(&binary, labels).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, is_duplicate: bool, score: Option<f64>) -> RunResultRow {
        RunResultRow {
            id: 1,
            run_id: "run-1".to_string(),
            query_id: None,
            query_text: "x".to_string(),
            domain: "example.com".to_string(),
            search_query: "x".to_string(),
            title: title.to_string(),
            snippet: String::new(),
            raw_url: "https://example.com".to_string(),
            final_url: "https://example.com".to_string(),
            raw_html_path: None,
            visible_text: None,
            fetch_error: None,
            extract_error: None,
            normalization_error: None,
            normalized_url: None,
            cache_key: None,
            cached_at: None,
            cache_expires_at: None,
            last_seen_at: "2026-01-01T00:00:00Z".to_string(),
            skip_reason: None,
            canonical_id: None,
            is_duplicate,
            is_hidden: is_duplicate,
            duplicate_count: 0,
            relevance_score: score,
            scored_at: None,
            score_version: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn falls_back_to_synthetic_dataset_when_no_scored_rows() {
        let dataset = build_dataset("current.db", &[]);
        assert_eq!(dataset.dataset_id, "synthetic-default");
        assert_eq!(dataset.features.len(), 2);
    }

    #[test]
    fn builds_dataset_from_scored_non_duplicate_rows() {
        let rows = vec![row("Engineer", false, Some(0.8)), row("Duplicate", true, Some(0.2))];
        let dataset = build_dataset("current.db", &rows);
        assert_eq!(dataset.dataset_id, "current.db:1");
        assert_eq!(dataset.labels, vec![1.0]);
    }

    #[tokio::test]
    async fn run_persists_one_result_per_registered_model() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let engine = EvaluationEngine::new(pool);
        engine.ensure_schema().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("models.yaml"),
            r#"
defaultModel: baseline
models:
  - identifier: baseline
    modulePath: jobato.models.baseline
    className: BaselineModel
    version: "1.0.0"
    name: Baseline
    enabled: true
"#,
        )
        .unwrap();
        let registry = crate::domain::registry::ModelRegistry::load(dir.path()).unwrap();

        let dataset = build_dataset("current.db", &[]);
        engine.run("eval-1", &registry, &dataset, 3).await.unwrap();

        let results = engine.get_results("eval-1").await.unwrap();
        assert_eq!(results.len(), 1);
        let run = engine.get_run("eval-1").await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
    }
}
