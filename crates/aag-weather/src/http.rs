//! HTTP JSON API over the query service.
//!
//! Handlers only read cached state or the weather store; none of them touch
//! the serial port.

use axum::{
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Form, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::reading::SensorReading;
use crate::service::{QueryService, Snapshot};
use crate::store::SharedStore;

/// Upper bound on `num_records`.
pub const MAX_RECORDS: usize = 10_000;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub store: Option<SharedStore>,
}

/// `num_records` from the query string, a form or a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct LatestParams {
    pub num_records: Option<usize>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Parse a POST body as a form or as JSON, going by its Content-Type.
async fn body_params(request: Request) -> Result<LatestParams, (StatusCode, String)> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        let Form(params) = Form::<LatestParams>::from_request(request, &())
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
        return Ok(params);
    }

    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    if body.is_empty() {
        return Ok(LatestParams::default());
    }
    serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid body: {}", e)))
}

/// GET|POST / and /latest.json - newest readings first
async fn latest(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
    request: Request,
) -> ApiResult<Vec<SensorReading>> {
    let from_body = match params.num_records {
        Some(_) => None,
        None => body_params(request).await?.num_records,
    };
    let n = params
        .num_records
        .or(from_body)
        .unwrap_or(1)
        .min(MAX_RECORDS);

    let records = match &state.store {
        Some(store) => store.lock().await.latest(n).map_err(internal)?,
        None => state.query.recent(n).await,
    };
    Ok(Json(records))
}

/// GET|POST /today.json - the last 24 hours, oldest first
async fn today(State(state): State<AppState>) -> ApiResult<Vec<SensorReading>> {
    let since = Utc::now() - chrono::Duration::hours(24);
    let records = match &state.store {
        Some(store) => store.lock().await.since(since).map_err(internal)?,
        None => state.query.since(since).await,
    };
    Ok(Json(records))
}

/// GET /download-db - the database file as an attachment
async fn download_db(State(state): State<AppState>) -> axum::response::Response {
    let Some(store) = &state.store else {
        return (StatusCode::NOT_FOUND, "no database configured").into_response();
    };
    let path = {
        let store = store.lock().await;
        let Some(path) = store.path().map(|p| p.to_path_buf()) else {
            return (StatusCode::NOT_FOUND, "database is not file backed").into_response();
        };
        if let Err(e) = store.checkpoint() {
            return internal(e).into_response();
        }
        path
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "weather.db".to_string());
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", name),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            internal(e).into_response()
        }
    }
}

/// GET /status
async fn status(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.query.snapshot().await)
}

/// GET /health
async fn health_check() -> &'static str {
    "ok"
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(latest).post(latest))
        .route("/latest.json", get(latest).post(latest))
        .route("/today.json", get(today).post(today))
        .route("/download-db", get(download_db))
        .route("/status", get(status))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Bind `listen` and run the HTTP server
pub async fn run_http_server(
    state: AppState,
    listen: &str,
    shutdown: watch::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(listen).await?;
    serve(listener, state, shutdown).await?;
    log::info!("HTTP server stopped");
    Ok(())
}
