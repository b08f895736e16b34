//! Axum JSON API over the document cache.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use normateca_core::{Document, DocumentStats, SearchFilter};
use normateca_sheets::FetchError;
use normateca_sync::{DocumentCache, SyncService};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "normateca-web";

pub const DEFAULT_PORT: u16 = 3001;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DocumentCache>,
    pub sync: Arc<SyncService>,
    pub started_at: Instant,
    pub port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsResponse {
    success: bool,
    data: Vec<Document>,
    last_sync: Option<DateTime<Utc>>,
    count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    success: bool,
    message: String,
    count: usize,
    last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    success: bool,
    data: Vec<Document>,
    count: usize,
    total: usize,
    filters: SearchFilter,
    last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    success: bool,
    data: StatsData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsData {
    total_documents: usize,
    total_lines: usize,
    statistics: DocumentStats,
    last_sync: Option<DateTime<Utc>>,
    summary: StatsSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsSummary {
    total_unique: usize,
    most_common_status: String,
    most_common_type: String,
    total_setors: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    status: &'static str,
    last_sync: Option<DateTime<Utc>>,
    documents_count: usize,
    total_lines: usize,
    uptime: f64,
}

#[derive(Debug, Serialize)]
struct TestResponse {
    message: String,
    timestamp: DateTime<Utc>,
    port: u16,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/documents", get(documents_handler))
        .route("/api/sync", post(sync_handler))
        .route("/api/search", get(search_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/status", get(status_handler))
        .route("/api/test", get(test_handler))
        .with_state(state)
}

/// Exact-origin CORS when a frontend URL is configured, permissive
/// otherwise.
pub fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    match frontend_url.and_then(|url| url.parse::<HeaderValue>().ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

pub async fn serve(state: AppState, frontend_url: Option<String>) -> anyhow::Result<()> {
    let port = state.port;
    let router = app(state).layer(cors_layer(frontend_url.as_deref()));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn serve_from_env(
    cache: Arc<DocumentCache>,
    sync: Arc<SyncService>,
) -> anyhow::Result<()> {
    let port: u16 = std::env::var("NORMATECA_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let frontend_url = std::env::var("FRONTEND_URL").ok();
    let state = AppState {
        cache,
        sync,
        started_at: Instant::now(),
        port,
    };
    serve(state, frontend_url).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down");
}

/// Reads always serve the current snapshot; refresh happens on the
/// schedule or through `POST /api/sync`.
async fn documents_handler(State(state): State<AppState>) -> Json<DocumentsResponse> {
    let snapshot = state.cache.snapshot();
    Json(DocumentsResponse {
        success: true,
        count: snapshot.search_view.len(),
        data: snapshot.search_view.clone(),
        last_sync: snapshot.last_sync,
    })
}

async fn sync_handler(State(state): State<AppState>) -> Response {
    match state.sync.refresh().await {
        Ok(summary) => {
            let snapshot = state.cache.snapshot();
            let message = if summary.updated {
                "sync completed".to_string()
            } else {
                "sheet returned no rows; previous data kept".to_string()
            };
            Json(SyncResponse {
                success: true,
                message,
                count: snapshot.search_view.len(),
                last_sync: snapshot.last_sync,
            })
            .into_response()
        }
        Err(err) => sync_error(err),
    }
}

fn sync_error(err: FetchError) -> Response {
    error!(error = %err, "on-demand sync failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            error: "sync failed".to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

async fn search_handler(
    State(state): State<AppState>,
    Query(filter): Query<SearchFilter>,
) -> Json<SearchResponse> {
    let snapshot = state.cache.snapshot();
    let data = filter.apply(&snapshot.search_view);
    Json(SearchResponse {
        success: true,
        count: data.len(),
        data,
        total: snapshot.search_view.len(),
        filters: filter,
        last_sync: snapshot.last_sync,
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let snapshot = state.cache.snapshot();
    let statistics = DocumentStats::collect(&snapshot.stats_view);
    let summary = StatsSummary {
        total_unique: statistics.total,
        most_common_status: statistics.most_common_status().unwrap_or("N/A").to_string(),
        most_common_type: statistics.most_common_type().unwrap_or("N/A").to_string(),
        total_setors: statistics.distinct_sectors(),
    };
    Json(StatsResponse {
        success: true,
        data: StatsData {
            total_documents: snapshot.stats_view.len(),
            total_lines: snapshot.search_view.len(),
            statistics,
            last_sync: snapshot.last_sync,
            summary,
        },
    })
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.cache.snapshot();
    Json(StatusResponse {
        success: true,
        status: "online",
        last_sync: snapshot.last_sync,
        documents_count: snapshot.stats_view.len(),
        total_lines: snapshot.search_view.len(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

async fn test_handler(State(state): State<AppState>) -> Json<TestResponse> {
    Json(TestResponse {
        message: "Normateca API online".to_string(),
        timestamp: Utc::now(),
        port: state.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use normateca_sheets::{RowSource, SheetTable};
    use tower::ServiceExt;

    struct StaticSource(SheetTable);

    #[async_trait]
    impl RowSource for StaticSource {
        async fn fetch_table(&self) -> Result<SheetTable, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RowSource for FailingSource {
        async fn fetch_table(&self) -> Result<SheetTable, FetchError> {
            Err(FetchError::Decode("upstream unavailable".into()))
        }
    }

    fn sample_table() -> SheetTable {
        SheetTable::from_values(vec![
            vec!["ID".into(), "Status".into(), "Setor Responsável".into()],
            vec!["1".into(), "Ativo".into(), "TI, RH".into()],
            vec!["".into(), "Em Revisão".into(), "TI".into()],
        ])
    }

    fn state_with(source: Arc<dyn RowSource>) -> AppState {
        let cache = Arc::new(DocumentCache::new());
        let sync = Arc::new(SyncService::new(source, cache.clone()));
        AppState {
            cache,
            sync,
            started_at: Instant::now(),
            port: DEFAULT_PORT,
        }
    }

    async fn seeded_state() -> AppState {
        let state = state_with(Arc::new(StaticSource(sample_table())));
        state.sync.refresh().await.expect("seed refresh");
        state
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn documents_serves_the_current_snapshot() {
        let app = app(seeded_state().await);
        let (status, body) = get_json(app, "/api/documents").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["id"], "1");
        assert_eq!(body["data"][1]["id"], "sheet_2");
        assert!(body["lastSync"].is_string());
    }

    #[tokio::test]
    async fn search_filters_by_sector_substring() {
        let app = app(seeded_state().await);
        let (status, body) = get_json(app, "/api/search?setor=rh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["total"], 2);
        assert_eq!(body["data"][0]["id"], "1");
        assert_eq!(body["filters"]["setor"], "rh");
        assert!(body["filters"]["tipo"].is_null());
    }

    #[tokio::test]
    async fn search_without_parameters_returns_everything() {
        let app = app(seeded_state().await);
        let (_, body) = get_json(app, "/api/search").await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["id"], "1");
    }

    #[tokio::test]
    async fn stats_aggregate_over_the_unique_view() {
        let app = app(seeded_state().await);
        let (status, body) = get_json(app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["totalDocuments"], 2);
        assert_eq!(data["totalLines"], 2);
        assert_eq!(data["statistics"]["bySetor"]["TI"], 2);
        assert_eq!(data["statistics"]["bySetor"]["RH"], 1);
        assert_eq!(data["statistics"]["byStatus"]["Ativo"], 1);
        assert_eq!(data["statistics"]["byStatus"]["Em Revisão"], 1);
        assert_eq!(data["summary"]["mostCommonStatus"], "Ativo");
        assert_eq!(data["summary"]["mostCommonType"], "N/A");
        assert_eq!(data["summary"]["totalSetors"], 2);
    }

    #[tokio::test]
    async fn on_demand_sync_reports_the_new_counts() {
        let state = state_with(Arc::new(StaticSource(sample_table())));
        let app = app(state);
        let (status, body) = post_json(app, "/api/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
        assert!(body["lastSync"].is_string());
    }

    #[tokio::test]
    async fn failed_sync_returns_the_error_envelope() {
        let state = state_with(Arc::new(FailingSource));
        let app = app(state);
        let (status, body) = post_json(app, "/api/sync").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "sync failed");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn status_probe_reports_freshness_and_uptime() {
        let app = app(seeded_state().await);
        let (status, body) = get_json(app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["documentsCount"], 2);
        assert_eq!(body["totalLines"], 2);
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_echoes_the_port() {
        let app = app(state_with(Arc::new(StaticSource(SheetTable::default()))));
        let (status, body) = get_json(app, "/api/test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port"], DEFAULT_PORT);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn empty_cache_serves_empty_collections() {
        let app = app(state_with(Arc::new(StaticSource(SheetTable::default()))));
        let (_, body) = get_json(app, "/api/documents").await;
        assert_eq!(body["count"], 0);
        assert!(body["lastSync"].is_null());
    }
}
