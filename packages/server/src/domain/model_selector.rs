//! Builds the `/ml/models/comparisons` payload: each registered model's
//! latest evaluation result joined against the currently active model.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::domain::activation::{ActivationError, ActivationService};
use crate::domain::evaluation::{EvaluationError, EvaluationResultRow};
use crate::domain::registry::ModelRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ModelSelectorError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Activation(#[from] ActivationError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelComparison {
    pub model_id: String,
    pub model_version: String,
    pub name: String,
    pub is_active: bool,
    pub latest_result: Option<EvaluationResultRow>,
}

pub async fn build_comparisons(
    pool: &SqlitePool,
    registry: &ModelRegistry,
    activation: &ActivationService,
) -> Result<Vec<ModelComparison>, ModelSelectorError> {
    let active = activation.get_active().await?;
    let mut out = Vec::new();

    for entry in registry.get_available_models() {
        let latest = sqlx::query_as::<_, EvaluationResultRow>(
            r#"
            SELECT er.* FROM evaluation_results er
            JOIN evaluation_runs run ON run.id = er.run_id
            WHERE er.model_id = ?
            ORDER BY run.started_at DESC
            LIMIT 1
            "#,
        )
        .bind(&entry.config.identifier)
        .fetch_optional(pool)
        .await?;

        let is_active = active
            .as_ref()
            .map(|a| a.model_id == entry.config.identifier)
            .unwrap_or(false);

        out.push(ModelComparison {
            model_id: entry.config.identifier.clone(),
            model_version: entry.config.version.clone(),
            name: entry.config.name.clone(),
            is_active,
            latest_result: latest,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marks_the_active_model_and_tolerates_no_results() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let activation = ActivationService::new(pool.clone());
        activation.ensure_schema().await.unwrap();
        let eval = crate::domain::evaluation::EvaluationEngine::new(pool.clone());
        eval.ensure_schema().await.unwrap();

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
        let registry = ModelRegistry::load(dir.path()).unwrap();

        activation.activate("baseline", "1.0.0", None, None).await.unwrap();

        let comparisons = build_comparisons(&pool, &registry, &activation).await.unwrap();
        assert_eq!(comparisons.len(), 1);
        assert!(comparisons[0].is_active);
        assert!(comparisons[0].latest_result.is_none());
    }
}
