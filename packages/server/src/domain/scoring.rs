//! Scores non-duplicate rows of a run with the selected model,
//! falling back to the baseline on any predict failure.

use chrono::Utc;
use jobato_core::{clamp_score, BaselineModel, FeatureRow, Model};

use crate::domain::activation::ActivationService;
use crate::domain::registry::ModelRegistry;
use crate::domain::store::{RunResultRow, ResultStore};

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Activation(#[from] crate::domain::activation::ActivationError),
}

/// Scores every non-duplicate row of `run_id`, in order: explicit
/// `requested_model_id` if registered, else the active model, else the
/// baseline. A predict failure for the selected model falls back to the
/// baseline score (0.0) for that run rather than aborting.
pub async fn score_run(
    store: &ResultStore,
    registry: &ModelRegistry,
    activation: &ActivationService,
    run_id: &str,
    requested_model_id: Option<&str>,
) -> Result<usize, ScoringError> {
    let rows = store.fetch_run_rows(run_id).await?;
    let candidates: Vec<&RunResultRow> = rows.iter().filter(|r| !r.is_duplicate).collect();
    if candidates.is_empty() {
        return Ok(0);
    }

    let features: Vec<FeatureRow> = candidates
        .iter()
        .map(|r| FeatureRow {
            title: r.title.clone(),
            snippet: r.snippet.clone(),
            domain: r.domain.clone(),
        })
        .collect();

    let active = activation.get_active().await?;

    let selected_identifier = requested_model_id
        .filter(|id| registry.has_model(id))
        .or_else(|| active.as_ref().filter(|a| registry.has_model(&a.model_id)).map(|a| a.model_id.as_str()));

    let (scores, score_version) = match selected_identifier.and_then(|id| registry.get_model(id)) {
        Some(entry) => {
            let mut model = entry.model.clone();
            match model.predict(&features) {
                Ok(predictions) => (predictions, entry.config.version.clone()),
                Err(_) => (vec![0.0; features.len()], "baseline".to_string()),
            }
        }
        None => {
            let baseline = BaselineModel::new();
            let predictions = baseline.predict(&features).unwrap_or_else(|_| vec![0.0; features.len()]);
            (predictions, "baseline".to_string())
        }
    };

    let now = Utc::now();
    for (row, score) in candidates.iter().zip(scores.iter()) {
        store
            .apply_score(row.id, clamp_score(*score), &score_version, now)
            .await?;
    }

    Ok(candidates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::NewRunResult;

    async fn store_with_one_row() -> ResultStore {
        let store = ResultStore::in_memory().await.unwrap();
        store
            .insert_batch(&[NewRunResult {
                run_id: "run-1".to_string(),
                query_text: "engineer".to_string(),
                domain: "example.com".to_string(),
                search_query: "site:example.com engineer".to_string(),
                title: "Senior Engineer".to_string(),
                snippet: "great role".to_string(),
                raw_url: "https://example.com/a".to_string(),
                final_url: "https://example.com/a".to_string(),
                last_seen_at: Utc::now(),
                ..Default::default()
            }])
            .await
            .unwrap();
        store
    }

    fn registry_dir_with_baseline() -> tempfile::TempDir {
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
        dir
    }

    #[tokio::test]
    async fn scores_with_baseline_when_no_active_model() {
        let store = store_with_one_row().await;
        let dir = registry_dir_with_baseline();
        let registry = ModelRegistry::load(dir.path()).unwrap();
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let activation = ActivationService::new(pool);
        activation.ensure_schema().await.unwrap();

        let scored = score_run(&store, &registry, &activation, "run-1", None).await.unwrap();
        assert_eq!(scored, 1);
        let rows = store.fetch_run_rows("run-1").await.unwrap();
        assert_eq!(rows[0].relevance_score, Some(0.0));
        assert_eq!(rows[0].score_version.as_deref(), Some("baseline"));
    }

    #[tokio::test]
    async fn explicit_model_id_takes_priority_over_active() {
        let store = store_with_one_row().await;
        let dir = registry_dir_with_baseline();
        let registry = ModelRegistry::load(dir.path()).unwrap();
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let activation = ActivationService::new(pool);
        activation.ensure_schema().await.unwrap();

        let scored = score_run(&store, &registry, &activation, "run-1", Some("baseline")).await.unwrap();
        assert_eq!(scored, 1);
        let rows = store.fetch_run_rows("run-1").await.unwrap();
        assert_eq!(rows[0].score_version.as_deref(), Some("1.0.0"));
    }
}
