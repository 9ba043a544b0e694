//! HTTP control surface: health, daemon status, guarded transitions and
//! report queries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::daemon::health::Check;
use crate::daemon::protocol::{DaemonKind, MainchainSource, StorageMode};
use crate::daemon::{HealthManager, Orchestrator};
use crate::error::{ReportsError, TransitionError};
use crate::reports::{self, Metrics, ReportsFeed, ReportsStore};

/// Name of the self-check covering the reports database
pub const REPORTS_CHECK: &str = "reports-db";

/// Everything the handlers need, cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub reports: Option<Arc<ReportsStore>>,
}

impl AppState {
    fn reports(&self) -> Result<&Arc<ReportsStore>, ApiError> {
        self.reports
            .as_ref()
            .ok_or(ApiError::Reports(ReportsError::NotConfigured))
    }

    /// Self-checks folded into the health verdict next to the daemons
    pub async fn self_checks(&self) -> Vec<Check> {
        match &self.reports {
            Some(store) => vec![match store.blocking(|s| s.ping()).await {
                Ok(()) => Check::pass(REPORTS_CHECK),
                Err(e) => Check::fail(REPORTS_CHECK, e.to_string()),
            }],
            None => Vec::new(),
        }
    }
}

pub struct HttpServer {
    config: ServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        tracing::info!("Starting HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(liveness_handler))
        .route("/api/health", get(health_handler))
        .route("/api/daemons/:kind", get(daemon_handler))
        .route("/api/daemons/:kind/restart", post(restart_handler))
        .route("/api/sidechain/mainchain", post(mainchain_handler))
        .route(
            "/api/basechain/storage",
            get(storage_get_handler).post(storage_handler),
        )
        .route("/api/reports/range", get(reports_range_handler))
        .route("/api/reports/all", get(reports_all_handler))
        .route("/api/reports/summary", get(reports_summary_handler))
        .route("/api/reports/daily", post(reports_record_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Handler failures, mapped onto status codes
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Transition(TransitionError),
    Reports(ReportsError),
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        Self::Transition(e)
    }
}

impl From<ReportsError> for ApiError {
    fn from(e: ReportsError) -> Self {
        Self::Reports(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::Transition(e) => {
                let status = match &e {
                    TransitionError::PreconditionNotMet { .. } => StatusCode::CONFLICT,
                    TransitionError::BelowMinimum { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    TransitionError::ConfigRead { .. }
                    | TransitionError::ConfigWriteFailed { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    TransitionError::RestartFailed { .. } | TransitionError::Restart { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                    TransitionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                };
                let mut body = json!({
                    "error": e.to_string(),
                    "config_changed": e.config_changed(),
                });
                if let TransitionError::RestartFailed { applied, .. } = &e {
                    body["applied"] = json!(applied);
                }
                (status, body)
            }
            Self::Reports(e) => {
                let status = match &e {
                    ReportsError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                    ReportsError::InvalidDate(_) => StatusCode::BAD_REQUEST,
                    ReportsError::Database(_) | ReportsError::Task(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, json!({ "error": e.to_string() }))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_kind(kind: &str) -> Result<DaemonKind, ApiError> {
    kind.parse().map_err(ApiError::BadRequest)
}

async fn liveness_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let verdict = state.health.verdict(state.self_checks().await).await;
    Json(json!(verdict))
}

async fn daemon_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let response = match state.health.probe_one(kind).await {
        Ok(snapshot) => Json(json!(snapshot)).into_response(),
        Err(failure) => (StatusCode::GATEWAY_TIMEOUT, Json(json!(failure))).into_response(),
    };
    Ok(response)
}

async fn restart_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_kind(&kind)?;
    let deadline = state.orchestrator.default_deadline();
    state.orchestrator.retry_restart(kind, deadline).await?;
    Ok(Json(json!({ "daemon": kind, "restart": "requested" })))
}

#[derive(Debug, Deserialize)]
struct MainchainRequest {
    source: String,
}

async fn mainchain_handler(
    State(state): State<AppState>,
    Json(req): Json<MainchainRequest>,
) -> Result<Json<Value>, ApiError> {
    let target: MainchainSource = req.source.parse().map_err(ApiError::BadRequest)?;
    let deadline = state.orchestrator.default_deadline();
    let accepted = state.orchestrator.switch_mainchain(target, deadline).await?;
    Ok(Json(json!(accepted)))
}

#[derive(Debug, Deserialize)]
struct StorageRequest {
    mode: String,
    #[serde(default)]
    prune_size_gb: Option<f64>,
    #[serde(default)]
    apply_now: bool,
}

async fn storage_get_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let storage = state.orchestrator.current_storage().await?;
    Ok(Json(json!(storage)))
}

async fn storage_handler(
    State(state): State<AppState>,
    Json(req): Json<StorageRequest>,
) -> Result<Json<Value>, ApiError> {
    let mode: StorageMode = req.mode.parse().map_err(ApiError::BadRequest)?;
    let deadline = state.orchestrator.default_deadline();
    let accepted = state
        .orchestrator
        .switch_storage(mode, req.prune_size_gb, req.apply_now, deadline)
        .await?;
    Ok(Json(json!(accepted)))
}

#[derive(Debug, Deserialize)]
struct DateRange {
    start: Option<String>,
    end: Option<String>,
}

impl DateRange {
    /// Both bounds, or neither
    fn parse(&self) -> Result<Option<(chrono::NaiveDate, chrono::NaiveDate)>, ApiError> {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => Ok(Some((reports::parse_date(start)?, reports::parse_date(end)?))),
            (None, None) => Ok(None),
            _ => Err(ApiError::BadRequest(
                "start and end must be given together".to_string(),
            )),
        }
    }
}

async fn reports_range_handler(
    State(state): State<AppState>,
    Query(range): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    let store = state.reports()?;
    let (start, end) = range
        .parse()?
        .ok_or_else(|| ApiError::BadRequest("start and end are required".to_string()))?;
    let rows = store.blocking(move |s| s.fetch_range(start, end)).await?;
    Ok(Json(json!(rows)))
}

async fn reports_all_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store = state.reports()?;
    let rows = store.blocking(|s| s.fetch_all()).await?;
    Ok(Json(json!(rows)))
}

async fn reports_summary_handler(
    State(state): State<AppState>,
    Query(range): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    let store = state.reports()?;
    let summary = match range.parse()? {
        Some((start, end)) => store.blocking(move |s| s.summary_range(start, end)).await?,
        None => store.blocking(|s| s.summary_all()).await?,
    };
    Ok(Json(json!(summary)))
}

#[derive(Debug, Deserialize)]
struct RecordRequest {
    /// Defaults to today (UTC)
    date: Option<String>,
    metrics: Metrics,
}

async fn reports_record_handler(
    State(state): State<AppState>,
    Json(req): Json<RecordRequest>,
) -> Result<Json<Value>, ApiError> {
    let store = state.reports()?;
    let date = match req.date.as_deref() {
        Some(d) => reports::parse_date(d)?,
        None => reports::report_day(Utc::now()),
    };
    let feed = ReportsFeed::new(Arc::clone(store));
    let outcome = feed
        .sample_and_record(&state.health, date, req.metrics)
        .await?;
    Ok(Json(json!(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::daemon::executor::CommandRunner;
    use crate::daemon::testing::{install, layout_config, ScriptedRunner};
    use crate::daemon::DaemonProber;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(config: ManagerConfig, reports: Option<Arc<ReportsStore>>) -> AppState {
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::new());
        let prober = Arc::new(DaemonProber::new(runner, Arc::new(config)));
        AppState {
            health: Arc::new(HealthManager::new(Arc::clone(&prober))),
            orchestrator: Arc::new(Orchestrator::new(prober)),
            reports,
        }
    }

    fn empty_node() -> (TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let config = layout_config(dir.path());
        (dir, state(config, None))
    }

    async fn call(state: AppState, req: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_liveness() {
        let (_dir, state) = empty_node();
        let (status, body) = call(state, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_of_empty_node_warns_per_daemon() {
        let (_dir, state) = empty_node();
        let (status, body) = call(state, get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overall"], "WARN");
        assert_eq!(body["issues"].as_array().unwrap().len(), 3);
        assert_eq!(body["issues"][0]["component"], "base-chain");
    }

    #[tokio::test]
    async fn test_daemon_status_and_unknown_kind() {
        let (_dir, state) = empty_node();
        let (status, body) = call(state.clone(), get_req("/api/daemons/lnd")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "lightning");
        assert_eq!(body["installed"], false);

        let (status, _) = call(state, get_req("/api/daemons/geth")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_local_switch_without_base_chain_conflicts() {
        let (_dir, state) = empty_node();
        let (status, body) = call(
            state,
            post_json("/api/sidechain/mainchain", json!({ "source": "local" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["config_changed"], false);
    }

    #[tokio::test]
    async fn test_storage_below_minimum_is_unprocessable() {
        let (_dir, state) = empty_node();
        let (status, _) = call(
            state,
            post_json(
                "/api/basechain/storage",
                json!({ "mode": "pruned", "prune_size_gb": 0.1 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_deferred_storage_switch() {
        let dir = tempfile::tempdir().unwrap();
        let config = layout_config(dir.path());
        install(&config, DaemonKind::BaseChain);
        let conf_path = config.bitcoind.config_file.clone();
        let state = state(config, None);

        let (status, body) = call(
            state.clone(),
            post_json(
                "/api/basechain/storage",
                json!({ "mode": "pruned", "prune_size_gb": 10.0, "apply_now": false }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["restart"], "deferred");
        assert_eq!(body["applied"]["type"], "storage");
        assert!(std::fs::read_to_string(conf_path).unwrap().contains("prune=10240"));

        let (_, body) = call(state, get_req("/api/basechain/storage")).await;
        assert_eq!(body["mode"], "pruned");
        assert_eq!(body["prune_size_gb"], 10.0);
    }

    #[tokio::test]
    async fn test_reports_unavailable_without_database() {
        let (_dir, state) = empty_node();
        let (status, _) = call(state, get_req("/api/reports/all")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reports_summary_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportsStore::open_in_memory().unwrap());
        store
            .upsert(&reports::Row {
                report_date: reports::parse_date("2026-03-02").unwrap(),
                metrics: Metrics {
                    forward_count: 4,
                    ..Metrics::default()
                },
            })
            .unwrap();
        let state = state(layout_config(dir.path()), Some(store));

        let (status, body) = call(
            state.clone(),
            get_req("/api/reports/summary?start=2026-04-01&end=2026-04-30"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 0);
        assert_eq!(body["averages"]["forward_count"], 0);

        let (_, body) = call(
            state.clone(),
            get_req("/api/reports/range?start=2026-03-01&end=2026-03-31"),
        )
        .await;
        assert_eq!(body[0]["report_date"], "2026-03-02");

        let (status, _) = call(state, get_req("/api/reports/range?start=2026-03-01")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_skipped_when_lnd_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportsStore::open_in_memory().unwrap());
        let state = state(layout_config(dir.path()), Some(Arc::clone(&store)));

        let (status, body) = call(
            state,
            post_json(
                "/api/reports/daily",
                json!({ "date": "2026-03-02", "metrics": { "forward_count": 1 } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "skipped");
        assert!(store.fetch_all().unwrap().is_empty());
    }
}
