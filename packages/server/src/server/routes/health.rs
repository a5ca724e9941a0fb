use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    current_run_db: CurrentRunDbHealth,
}

#[derive(Serialize)]
pub struct CurrentRunDbHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Reports process liveness plus whether the current-run DB is
/// reachable, timing the check out after a few seconds.
pub async fn health_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match state.current_db_path() {
        None => CurrentRunDbHealth {
            status: "ok".to_string(),
            error: None,
        },
        Some(path) => {
            let probe = tokio::time::timeout(std::time::Duration::from_secs(3), async move {
                crate::domain::store::ResultStore::open(&path).await
            })
            .await;
            match probe {
                Ok(Ok(_)) => CurrentRunDbHealth {
                    status: "ok".to_string(),
                    error: None,
                },
                Ok(Err(e)) => CurrentRunDbHealth {
                    status: "error".to_string(),
                    error: Some(e.to_string()),
                },
                Err(_) => CurrentRunDbHealth {
                    status: "error".to_string(),
                    error: Some("timed out after 3s".to_string()),
                },
            }
        }
    };

    let is_healthy = db_health.status == "ok";
    let status_code = if is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            current_run_db: db_health,
        }),
    )
}
