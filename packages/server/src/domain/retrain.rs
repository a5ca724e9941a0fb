//! Retrain pipeline: refits the active model on newly labeled rows,
//! versions the artifact, and promotes it via the Activation Service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobato_core::{calculate_metrics, to_binary_prediction, FeatureRow, Metrics, Model};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use tokio::sync::Mutex;

use crate::domain::activation::ActivationService;
use crate::domain::registry::ModelRegistry;
use crate::domain::store::{ResultStore, RunResultRow};

#[derive(Debug, thiserror::Error)]
pub enum RetrainError {
    #[error("a retrain job is already in progress")]
    Busy,

    #[error("no active model to retrain")]
    NoActiveModel,

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Activation(#[from] crate::domain::activation::ActivationError),

    #[error("artifact I/O failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("reloaded artifact version {reloaded} does not match written version {written}")]
    VerificationMismatch { written: String, reloaded: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub model_id: String,
    pub model_version: String,
    pub trained_at: String,
    pub metrics: MetricsPayload,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

impl From<Metrics> for MetricsPayload {
    fn from(m: Metrics) -> Self {
        Self {
            precision: m.precision,
            recall: m.recall,
            f1: m.f1,
            accuracy: m.accuracy,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RetrainJobRow {
    pub id: String,
    pub model_id: String,
    pub previous_version: String,
    pub new_version: Option<String>,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub label_count: i64,
    pub metrics_json: Option<String>,
    pub error: Option<String>,
    pub trigger: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainTrigger {
    Manual,
    Scheduled,
}

impl RetrainTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            RetrainTrigger::Manual => "manual",
            RetrainTrigger::Scheduled => "scheduled",
        }
    }
}

/// `"<previous>-<YYYYMMDDhhmmss>"`.
pub fn generate_retrain_version(previous_version: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", previous_version, now.format("%Y%m%d%H%M%S"))
}

pub fn artifact_path(artifact_dir: &Path, model_id: &str, version: &str) -> PathBuf {
    artifact_dir.join(format!("{model_id}_{version}.pkl"))
}

pub struct RetrainPipeline {
    eval_pool: SqlitePool,
    lock: Arc<Mutex<()>>,
    artifact_dir: PathBuf,
}

impl RetrainPipeline {
    pub fn new(eval_pool: SqlitePool, artifact_dir: PathBuf) -> Self {
        Self {
            eval_pool,
            lock: Arc::new(Mutex::new(())),
            artifact_dir,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub async fn ensure_schema(&self) -> Result<(), RetrainError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retrain_jobs (
                id TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                previous_version TEXT NOT NULL,
                new_version TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                label_count INTEGER NOT NULL DEFAULT 0,
                metrics_json TEXT,
                error TEXT,
                trigger_source TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.eval_pool)
        .await?;
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<RetrainJobRow>, RetrainError> {
        let rows = sqlx::query_as::<_, RetrainJobRow>(
            "SELECT id, model_id, previous_version, new_version, status, started_at, completed_at, label_count, metrics_json, error, trigger_source AS trigger FROM retrain_jobs ORDER BY started_at DESC",
        )
        .fetch_all(&self.eval_pool)
        .await?;
        Ok(rows)
    }

    /// Non-blocking: a second concurrent call observes `RetrainError::Busy`
    /// rather than waiting.
    pub async fn run_once(
        &self,
        job_id: &str,
        run_store: &ResultStore,
        db_filename: &str,
        registry: &ModelRegistry,
        activation: &ActivationService,
        trigger: RetrainTrigger,
    ) -> Result<RetrainJobRow, RetrainError> {
        let _guard = self.lock.try_lock().map_err(|_| RetrainError::Busy)?;

        let active = activation.get_active().await?.ok_or(RetrainError::NoActiveModel)?;
        let now = crate::domain::now_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO retrain_jobs (id, model_id, previous_version, status, started_at, label_count, trigger_source)
            VALUES (?, ?, ?, 'running', ?, 0, ?)
            "#,
        )
        .bind(job_id)
        .bind(&active.model_id)
        .bind(&active.model_version)
        .bind(&now)
        .bind(trigger.as_str())
        .execute(&self.eval_pool)
        .await?;

        let all_rows = run_store.fetch_run_rows(db_filename).await?;
        let labels = labeled_rows(&all_rows, last_retrain_timestamp(&self.history().await?, &active.model_id));

        if labels.is_empty() {
            return self.finish(job_id, "skipped", None, 0, None, None).await;
        }

        let Some(entry) = registry.get_model(&active.model_id) else {
            return self
                .finish(job_id, "failed", None, labels.len() as i64, None, Some("model not registered"))
                .await;
        };

        let features: Vec<FeatureRow> = labels
            .iter()
            .map(|r| FeatureRow {
                title: r.title.clone(),
                snippet: r.snippet.clone(),
                domain: r.domain.clone(),
            })
            .collect();
        let label_values: Vec<f64> = labels
            .iter()
            .map(|r| if r.relevance_score.unwrap_or(0.0) > 0.0 { 1.0 } else { 0.0 })
            .collect();

        let mut model = entry.model.clone();
        let fit_result: Result<Metrics, String> = (|| {
            model.fit(&features, &label_values).map_err(|e| e.to_string())?;
            let predictions = model.predict(&features).map_err(|e| e.to_string())?;
            let binary: Vec<f64> = predictions.iter().map(|p| to_binary_prediction(*p)).collect();
            calculate_metrics(&binary, &label_values).map_err(|e| e.to_string())
        })();

        let metrics = match fit_result {
            Ok(m) => m,
            Err(err) => {
                return self
                    .finish(job_id, "failed", None, labels.len() as i64, None, Some(&err))
                    .await
            }
        };

        let new_version = generate_retrain_version(&active.model_version, Utc::now());
        let header = ArtifactHeader {
            model_id: active.model_id.clone(),
            model_version: new_version.clone(),
            trained_at: crate::domain::now_rfc3339(),
            metrics: metrics.clone().into(),
            payload: serde_json::json!({ "kind": entry.config.class_name }),
        };

        if let Err(err) = self.write_and_verify(&active.model_id, &new_version, &header) {
            return self
                .finish(job_id, "failed", None, labels.len() as i64, None, Some(&err.to_string()))
                .await;
        }

        activation
            .activate(&active.model_id, &new_version, None, Some("retrain"))
            .await?;

        let metrics_json = serde_json::to_string(&MetricsPayload::from(metrics))?;
        self.finish(
            job_id,
            "completed",
            Some(&new_version),
            labels.len() as i64,
            Some(&metrics_json),
            None,
        )
        .await
    }

    fn write_and_verify(
        &self,
        model_id: &str,
        version: &str,
        header: &ArtifactHeader,
    ) -> Result<(), RetrainError> {
        std::fs::create_dir_all(&self.artifact_dir)?;
        let path = artifact_path(&self.artifact_dir, model_id, version);
        let json = serde_json::to_vec(header)?;
        std::fs::write(&path, json)?;

        let reloaded_bytes = std::fs::read(&path)?;
        let reloaded: ArtifactHeader = serde_json::from_slice(&reloaded_bytes)?;
        if reloaded.model_version != version {
            return Err(RetrainError::VerificationMismatch {
                written: version.to_string(),
                reloaded: reloaded.model_version,
            });
        }
        Ok(())
    }

    async fn finish(
        &self,
        job_id: &str,
        status: &str,
        new_version: Option<&str>,
        label_count: i64,
        metrics_json: Option<&str>,
        error: Option<&str>,
    ) -> Result<RetrainJobRow, RetrainError> {
        sqlx::query(
            r#"
            UPDATE retrain_jobs
            SET status = ?, new_version = ?, label_count = ?, metrics_json = ?, error = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(new_version)
        .bind(label_count)
        .bind(metrics_json)
        .bind(error)
        .bind(crate::domain::now_rfc3339())
        .bind(job_id)
        .execute(&self.eval_pool)
        .await?;

        let row = sqlx::query_as::<_, RetrainJobRow>(
            "SELECT id, model_id, previous_version, new_version, status, started_at, completed_at, label_count, metrics_json, error, trigger_source AS trigger FROM retrain_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_one(&self.eval_pool)
        .await?;
        Ok(row)
    }
}

fn last_retrain_timestamp(jobs: &[RetrainJobRow], model_id: &str) -> Option<DateTime<Utc>> {
    jobs.iter()
        .filter(|j| j.model_id == model_id && j.status == "completed")
        .filter_map(|j| j.completed_at.as_deref())
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .max()
}

fn labeled_rows(rows: &[RunResultRow], since: Option<DateTime<Utc>>) -> Vec<&RunResultRow> {
    rows.iter()
        .filter(|r| !r.is_duplicate && r.relevance_score.is_some())
        .filter(|r| match (since, r.scored_at.as_deref()) {
            (Some(cutoff), Some(scored_at)) => DateTime::parse_from_rfc3339(scored_at)
                .map(|d| d.with_timezone(&Utc) > cutoff)
                .unwrap_or(true),
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_timestamped_version_suffix() {
        let now = Utc::now();
        let version = generate_retrain_version("1.0.0", now);
        assert!(version.starts_with("1.0.0-"));
        assert_eq!(version.len(), "1.0.0-".len() + 14);
    }

    #[tokio::test]
    async fn run_once_skips_when_no_labels_present() {
        let eval_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RetrainPipeline::new(eval_pool.clone(), dir.path().join("artifacts"));
        pipeline.ensure_schema().await.unwrap();

        let activation = ActivationService::new(eval_pool.clone());
        activation.ensure_schema().await.unwrap();
        activation.activate("baseline", "1.0.0", None, None).await.unwrap();

        let models_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            models_dir.path().join("models.yaml"),
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
        let registry = ModelRegistry::load(models_dir.path()).unwrap();

        let store = ResultStore::in_memory().await.unwrap();
        let job = pipeline
            .run_once("job-1", &store, "run-1", &registry, &activation, RetrainTrigger::Manual)
            .await
            .unwrap();
        assert_eq!(job.status, "skipped");
    }

    #[tokio::test]
    async fn concurrent_run_once_is_rejected_as_busy() {
        let eval_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(RetrainPipeline::new(eval_pool.clone(), dir.path().join("artifacts")));
        pipeline.ensure_schema().await.unwrap();
        let _held = pipeline.lock.try_lock().unwrap();

        let activation = ActivationService::new(eval_pool);
        let models_dir = tempfile::tempdir().unwrap();
        std::fs::write(models_dir.path().join("models.yaml"), "models: []\n").unwrap();
        let registry = ModelRegistry::load(models_dir.path()).unwrap();
        let store = ResultStore::in_memory().await.unwrap();

        let err = pipeline
            .run_once("job-2", &store, "run-1", &registry, &activation, RetrainTrigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrainError::Busy));
    }
}
