//! Process entry point: loads configuration, opens the evaluations
//! database, builds every domain service, starts the daily retrain
//! scheduler and the Redis Streams consumer loop, and serves the HTTP
//! surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use jobato_core::{BraveSearchClient, BraveSearchConfig, DeterministicMockSearchClient, DeterministicMockUrlResolver, HttpUrlResolver};
use jobato_server::config::{self, Config, SearchProvider};
use jobato_server::domain::activation::ActivationService;
use jobato_server::domain::cache::CacheConfig as DomainCacheConfig;
use jobato_server::domain::evaluation::EvaluationEngine;
use jobato_server::domain::events::{self, EventStreamClient};
use jobato_server::domain::quota::QuotaLedger;
use jobato_server::domain::registry::ModelRegistry;
use jobato_server::domain::retrain::{RetrainPipeline, RetrainTrigger};
use jobato_server::domain::run_worker::RunWorker;
use jobato_server::domain::scheduler::{DailySchedule, Scheduler};
use jobato_server::server::{build_app, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobato_server=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(data_dir = %config.data_dir.display(), config_dir = %config.config_dir.display(), "configuration loaded");

    std::fs::create_dir_all(config.data_dir.join("db")).context("failed to create data dir")?;
    let eval_db_path = config.data_dir.join("db/evaluations.db");
    let eval_pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&format!("sqlite://{}?mode=rwc", eval_db_path.display()))
        .await
        .context("failed to open evaluations.db")?;

    let activation = Arc::new(ActivationService::new(eval_pool.clone()));
    activation.ensure_schema().await.context("failed to create activation schema")?;

    let evaluation = Arc::new(EvaluationEngine::new(eval_pool.clone()));
    evaluation.ensure_schema().await.context("failed to create evaluation schema")?;

    let artifact_dir = config.data_dir.join("artifacts");
    let retrain = Arc::new(RetrainPipeline::new(eval_pool.clone(), artifact_dir));
    retrain.ensure_schema().await.context("failed to create retrain schema")?;

    let quota = Arc::new(QuotaLedger::new(eval_pool.clone()));
    quota.ensure_schema().await.context("failed to create quota schema")?;

    let registry = Arc::new(ModelRegistry::load(&config.config_dir).context("failed to load models.yaml")?);
    for failure in registry.failures() {
        tracing::warn!(identifier = %failure.identifier, error_type = failure.error_type, error = %failure.error_message, "model registry load failure");
    }
    if activation.get_active().await?.is_none() {
        if let Some(default_entry) = registry.get_default_model() {
            activation
                .activate(&default_entry.config.identifier, &default_entry.config.version, None, Some("startup-default"))
                .await
                .context("failed to activate default model")?;
        }
    }

    let search: Arc<dyn jobato_core::SearchClient> = match config.search_provider {
        SearchProvider::Mock | SearchProvider::Google => Arc::new(DeterministicMockSearchClient),
        SearchProvider::Brave => Arc::new(BraveSearchClient::new(BraveSearchConfig::new(
            config.brave_api_key.clone().context("BRAVE_SEARCH_API_KEY missing")?,
        ))),
    };
    let resolver: Arc<dyn jobato_core::UrlResolver> = match config.search_provider {
        SearchProvider::Mock => Arc::new(DeterministicMockUrlResolver),
        _ => Arc::new(HttpUrlResolver::default()),
    };

    let run_worker = Arc::new(RunWorker {
        data_dir: config.data_dir.clone(),
        config_dir: config.config_dir.clone(),
        search,
        resolver,
        quota: quota.clone(),
        registry: registry.clone(),
        activation: activation.clone(),
    });

    let state = AppState {
        data_dir: config.data_dir.clone(),
        config_dir: config.config_dir.clone(),
        eval_pool: eval_pool.clone(),
        registry: registry.clone(),
        activation: activation.clone(),
        evaluation: evaluation.clone(),
        retrain: retrain.clone(),
        quota: quota.clone(),
        run_worker: run_worker.clone(),
    };

    let app = build_app(state);

    if config.retrain_enabled {
        let schedule = DailySchedule::parse(&config.retrain_schedule).context("invalid RETRAIN_SCHEDULE")?;
        let (scheduler, stop_rx) = Scheduler::new(schedule, true);
        let retrain_for_schedule = retrain.clone();
        let registry_for_schedule = registry.clone();
        let activation_for_schedule = activation.clone();
        let data_dir_for_schedule = config.data_dir.clone();
        tokio::spawn(async move {
            scheduler
                .run(stop_rx, move || {
                    let retrain = retrain_for_schedule.clone();
                    let registry = registry_for_schedule.clone();
                    let activation = activation_for_schedule.clone();
                    let data_dir = data_dir_for_schedule.clone();
                    async move {
                        let pointer = data_dir.join("db/current-db.txt");
                        let Ok(content) = std::fs::read_to_string(&pointer) else {
                            tracing::info!("scheduled retrain skipped: no current run database");
                            return;
                        };
                        let path = std::path::PathBuf::from(content.trim());
                        let run_id = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                        let Ok(store) = jobato_server::domain::store::ResultStore::open(&path).await else {
                            tracing::warn!("scheduled retrain skipped: could not open current run database");
                            return;
                        };
                        let job_id = uuid::Uuid::new_v4().to_string();
                        match retrain.run_once(&job_id, &store, &run_id, &registry, &activation, RetrainTrigger::Scheduled).await {
                            Ok(job) => tracing::info!(job_id = %job.id, status = %job.status, "scheduled retrain finished"),
                            Err(err) => tracing::warn!(error = %err, "scheduled retrain failed"),
                        }
                    }
                })
                .await;
        });
    }

    {
        let redis_url = config.redis_url();
        let run_worker = run_worker.clone();
        let quota_config = config::load_quota_config(&config.config_dir).context("failed to load quota.yaml")?;
        let cache_config = config::load_cache_config(&config.config_dir).context("failed to load cache.yaml")?;
        let domain_cache_config = DomainCacheConfig {
            ttl_hours: cache_config.ttl_hours,
            revisit_throttle_days: cache_config.revisit_throttle_days,
        };
        let data_dir = config.data_dir.clone();
        tokio::spawn(async move {
            run_event_loop(&redis_url, run_worker, quota_config, domain_cache_config, data_dir).await;
        });
    }

    let addr = format!("0.0.0.0:{}", config.http_port);
    tracing::info!(%addr, "starting jobato-server");
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind address")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Polls `ml:run-events` for `run.requested` messages and drives each
/// through the run worker, publishing a completion or failure event.
async fn run_event_loop(
    redis_url: &str,
    run_worker: Arc<RunWorker>,
    quota_config: config::QuotaConfig,
    cache_config: DomainCacheConfig,
    data_dir: std::path::PathBuf,
) {
    let mut client = match EventStreamClient::connect(redis_url).await {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to redis, event loop not started");
            return;
        }
    };

    let mut last_id = "$".to_string();
    loop {
        let batch = match client.read_batch(&last_id).await {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(error = %err, "error reading event stream, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        for message in &batch {
            last_id = message.id.clone();
            let event = match events::parse_run_requested_event(message) {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, message_id = %message.id, "skipping malformed run event");
                    continue;
                }
            };

            tracing::info!(run_id = %event.run_id, inputs = event.run_inputs.len(), "processing run.requested");
            let outcome = run_worker
                .process_event(&event.run_id, event.run_inputs, &cache_config, &quota_config, &data_dir)
                .await;

            match outcome {
                Ok(outcome) => {
                    tracing::info!(
                        run_id = %event.run_id,
                        issued_calls = outcome.issued_calls,
                        persisted = outcome.persisted_results,
                        relevant = outcome.relevant_count,
                        "run completed"
                    );
                    let payload = serde_json::json!({
                        "runId": event.run_id,
                        "issuedCalls": outcome.issued_calls,
                        "persistedResults": outcome.persisted_results,
                        "newJobsCount": outcome.new_jobs_count,
                        "relevantCount": outcome.relevant_count,
                        "skipped404": outcome.skipped404,
                    });
                    if let Err(err) = client.publish(events::COMPLETED_EVENT_TYPE, &event.run_id, &payload).await {
                        tracing::warn!(error = %err, "failed to publish run.completed");
                    }
                }
                Err(err) => {
                    tracing::warn!(run_id = %event.run_id, error = %err, "run failed");
                    let payload = serde_json::json!({ "runId": event.run_id, "error": err.to_string() });
                    if let Err(err) = client.publish(events::FAILED_EVENT_TYPE, &event.run_id, &payload).await {
                        tracing::warn!(error = %err, "failed to publish run.failed");
                    }
                }
            }
        }
    }
}
