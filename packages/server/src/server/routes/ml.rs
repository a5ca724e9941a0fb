//! `/ml/*` operator endpoints: model registry, evaluations, activation,
//! retrain. Handlers are thin: deserialize, call a domain component,
//! translate its typed error to a status code.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::domain::activation::ActivationError;
use crate::domain::evaluation::build_dataset;
use crate::domain::retrain::RetrainTrigger;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct ModelSummary {
    identifier: String,
    name: String,
    version: String,
    description: String,
}

pub async fn list_models(Extension(state): Extension<AppState>) -> Json<Vec<ModelSummary>> {
    let models = state
        .registry
        .get_available_models()
        .map(|e| ModelSummary {
            identifier: e.config.identifier.clone(),
            name: e.config.name.clone(),
            version: e.config.version.clone(),
            description: e.config.description.clone(),
        })
        .collect();
    Json(models)
}

pub async fn model_comparisons(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<crate::domain::model_selector::ModelComparison>>, StatusCode> {
    let comparisons = crate::domain::model_selector::build_comparisons(&state.eval_pool, &state.registry, &state.activation)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(comparisons))
}

pub async fn active_model(
    Extension(state): Extension<AppState>,
) -> Result<Json<Option<crate::domain::activation::ActiveModelRow>>, StatusCode> {
    let active = state.activation.get_active().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(active))
}

pub async fn activation_history(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<crate::domain::activation::ActivationHistoryRow>>, StatusCode> {
    let history = state.activation.history().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(history))
}

fn activation_status(err: &ActivationError) -> StatusCode {
    match err {
        ActivationError::UnknownModel(_) | ActivationError::NotEvaluated(_) | ActivationError::NoHistory(_) => {
            StatusCode::NOT_FOUND
        }
        ActivationError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn activate_model(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    if !state.registry.has_model(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    let entry = state.registry.get_model(&id).expect("checked above");
    state
        .activation
        .activate(&id, &entry.config.version, None, None)
        .await
        .map_err(|e| activation_status(&e))?;
    Ok(StatusCode::OK)
}

pub async fn rollback_model(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    if !state.registry.has_model(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    state.activation.rollback(&id).await.map_err(|e| activation_status(&e))?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
pub struct TriggerEvaluationResponse {
    evaluation_id: String,
    status: &'static str,
    dataset_id: String,
    total_models: usize,
    eval_workers: u32,
}

pub async fn trigger_evaluation(
    Extension(state): Extension<AppState>,
) -> Result<(StatusCode, Json<TriggerEvaluationResponse>), StatusCode> {
    let eval_workers =
        crate::config::load_eval_workers(&state.config_dir).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let (db_filename, rows) = match state.current_db_path() {
        Some(path) => {
            let store = crate::domain::store::ResultStore::open(&path)
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let filename = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
            let run_id = path.file_stem().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
            let rows = store.fetch_run_rows(&run_id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            (filename, rows)
        }
        None => ("none".to_string(), Vec::new()),
    };

    let dataset = build_dataset(&db_filename, &rows);
    let evaluation_id = uuid::Uuid::new_v4().to_string();
    let total_models = state.registry.get_available_models().count();

    let evaluation = state.evaluation.clone();
    let registry = state.registry.clone();
    let eval_id_for_task = evaluation_id.clone();
    let dataset_for_task = dataset.clone();
    tokio::spawn(async move {
        if let Err(err) = evaluation.run(&eval_id_for_task, &registry, &dataset_for_task, eval_workers).await {
            tracing::warn!(evaluation_id = %eval_id_for_task, error = %err, "evaluation run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerEvaluationResponse {
            evaluation_id,
            status: "running",
            dataset_id: dataset.dataset_id,
            total_models,
            eval_workers,
        }),
    ))
}

pub async fn get_evaluation(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::domain::evaluation::EvaluationRunRow>, StatusCode> {
    let run = state.evaluation.get_run(&id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    run.map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_evaluation_results(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<crate::domain::evaluation::EvaluationResultRow>>, StatusCode> {
    let results = state.evaluation.get_results(&id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(results))
}

#[derive(Serialize)]
pub struct RetrainTriggerResponse {
    job_id: String,
    status: String,
}

pub async fn trigger_retrain(
    Extension(state): Extension<AppState>,
) -> Result<Json<RetrainTriggerResponse>, StatusCode> {
    if state.retrain.is_busy() {
        return Err(StatusCode::CONFLICT);
    }

    let Some(path) = state.current_db_path() else {
        return Err(StatusCode::CONFLICT);
    };
    let run_id = path.file_stem().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
    let store = crate::domain::store::ResultStore::open(&path)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let job = state
        .retrain
        .run_once(&job_id, &store, &run_id, &state.registry, &state.activation, RetrainTrigger::Manual)
        .await
        .map_err(|e| match e {
            crate::domain::retrain::RetrainError::Busy => StatusCode::CONFLICT,
            crate::domain::retrain::RetrainError::NoActiveModel => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    Ok(Json(RetrainTriggerResponse {
        job_id: job.id,
        status: job.status,
    }))
}

pub async fn retrain_status(
    Extension(state): Extension<AppState>,
) -> Result<Json<Option<crate::domain::retrain::RetrainJobRow>>, StatusCode> {
    let history = state.retrain.history().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(history.into_iter().next()))
}

pub async fn retrain_history(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<crate::domain::retrain::RetrainJobRow>>, StatusCode> {
    let history = state.retrain.history().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(history))
}
