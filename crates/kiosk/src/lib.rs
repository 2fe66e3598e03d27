//! Booth Kiosk Controller
//!
//! Settings, logging, session recorder and the HTTP status server of the
//! booth kiosk binary.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use session::SnapshotReceiver;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use storage::SessionRepository;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod recorder;
pub mod routes;
pub mod settings;

pub use recorder::{FfmpegRecorder, RecorderSettings};
pub use settings::{Settings, SettingsError};

/// Application state shared across handlers
pub struct AppState {
    /// Latest orchestrator snapshot
    pub snapshots: SnapshotReceiver,
    /// Session archive
    pub repository: Arc<SessionRepository>,
    /// Prometheus exporter (absent when no recorder is installed)
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        snapshots: SnapshotReceiver,
        repository: Arc<SessionRepository>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            snapshots,
            repository,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub analysis: ComponentHealth,
    pub database: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub last_activity_ms: Option<u64>,
}

/// Analysis counts as stalled when no snapshot arrived for this long
const ANALYSIS_STALE_MS: u64 = 5_000;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/status", get(routes::status::get_status))
        .route("/api/v1/sessions", get(routes::sessions::get_sessions))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let updated_at = state.snapshots.borrow().updated_at;
    let analysis_age = updated_at.map(|at| {
        (chrono::Local::now() - at).num_milliseconds().max(0) as u64
    });
    let analysis = ComponentHealth {
        status: match analysis_age {
            None => "starting",
            Some(age) if age > ANALYSIS_STALE_MS => "stalled",
            Some(_) => "ok",
        }
        .to_string(),
        last_activity_ms: analysis_age,
    };

    let database_ok = state.repository.count().await.is_ok();
    let database = ComponentHealth {
        status: if database_ok { "ok" } else { "error" }.to_string(),
        last_activity_ms: None,
    };

    let healthy = database_ok && analysis.status != "stalled";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus { analysis, database },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed\n".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(settings: &settings::LogSettings) -> anyhow::Result<()> {
    let level = Level::from_str(&settings.level)?;

    if settings.json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Install the global metrics recorder
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Run the status server until `shutdown` resolves
pub async fn run_server(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use session::SessionSnapshot;
    use storage::{Outcome, SessionRecord};
    use tokio::sync::watch;
    use tower::ServiceExt;

    async fn state(snapshot: SessionSnapshot) -> (Arc<AppState>, watch::Sender<SessionSnapshot>) {
        let (tx, rx) = watch::channel(snapshot);
        let repository = Arc::new(SessionRepository::in_memory().await.unwrap());
        (Arc::new(AppState::new(rx, repository, None)), tx)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_returns_latest_snapshot() {
        let (state, tx) = state(SessionSnapshot::default()).await;
        tx.send_replace(SessionSnapshot {
            current_step: 4,
            total_steps: 11,
            ticks: 120,
            ..Default::default()
        });

        let (status, json) = get_json(create_router(state), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["current_step"], 4);
        assert_eq!(json["total_steps"], 11);
        assert_eq!(json["presence"], "absent");
    }

    #[tokio::test]
    async fn test_sessions_newest_first() {
        let (state, _tx) = state(SessionSnapshot::default()).await;
        for steps in [2, 11] {
            let record = SessionRecord::new(
                uuid::Uuid::new_v4(),
                chrono::Local::now().naive_local(),
                std::time::Duration::from_secs(60),
                Outcome::Completed,
                steps,
            );
            state.repository.insert(&record).await.unwrap();
        }

        let (status, json) = get_json(create_router(state), "/api/v1/sessions?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        assert_eq!(json["total"], 2);
        assert_eq!(json["data"][0]["steps_completed"], 11);
        assert_eq!(json["data"][0]["outcome"], "completed");
    }

    #[tokio::test]
    async fn test_health_before_first_tick() {
        let (state, _tx) = state(SessionSnapshot::default()).await;
        let (status, json) = get_json(create_router(state), "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["analysis"]["status"], "starting");
        assert_eq!(json["components"]["database"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_metrics_without_exporter() {
        let (state, _tx) = state(SessionSnapshot::default()).await;
        let response = create_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
