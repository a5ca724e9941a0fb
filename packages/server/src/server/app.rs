//! Application setup: shared state and route wiring.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::domain::activation::ActivationService;
use crate::domain::evaluation::EvaluationEngine;
use crate::domain::quota::QuotaLedger;
use crate::domain::registry::ModelRegistry;
use crate::domain::retrain::RetrainPipeline;
use crate::domain::run_worker::RunWorker;

/// Shared application state, injected into handlers via `Extension`.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub eval_pool: SqlitePool,
    pub registry: Arc<ModelRegistry>,
    pub activation: Arc<ActivationService>,
    pub evaluation: Arc<EvaluationEngine>,
    pub retrain: Arc<RetrainPipeline>,
    pub quota: Arc<QuotaLedger>,
    pub run_worker: Arc<RunWorker>,
}

impl AppState {
    pub fn current_db_path(&self) -> Option<PathBuf> {
        let pointer = self.data_dir.join("db/current-db.txt");
        let content = std::fs::read_to_string(pointer).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health::health_handler))
        .route("/ml/models", get(super::routes::ml::list_models))
        .route("/ml/models/comparisons", get(super::routes::ml::model_comparisons))
        .route("/ml/models/active", get(super::routes::ml::active_model))
        .route("/ml/models/history", get(super::routes::ml::activation_history))
        .route("/ml/models/:id/activate", post(super::routes::ml::activate_model))
        .route("/ml/models/:id/rollback", post(super::routes::ml::rollback_model))
        .route("/ml/evaluations", post(super::routes::ml::trigger_evaluation))
        .route("/ml/evaluations/:id", get(super::routes::ml::get_evaluation))
        .route("/ml/evaluations/:id/results", get(super::routes::ml::get_evaluation_results))
        .route("/ml/retrain/trigger", post(super::routes::ml::trigger_retrain))
        .route("/ml/retrain/status", get(super::routes::ml::retrain_status))
        .route("/ml/retrain/history", get(super::routes::ml::retrain_history))
        .layer(axum::Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
