//! HTTP control surface for the indexing and search services.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/index` | Start (or incrementally update) an index build |
//! | `GET`  | `/index/status/{request_id}` | Poll build progress |
//! | `GET`  | `/search` | Ranked search over indexed files |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Build requests return `202 Accepted` with a request id immediately; the
//! build itself runs asynchronously. Polling the status returns `200` once
//! the build is complete, `202` while it is in progress, and `500` if it
//! failed. A build submitted while another is in flight is rejected with
//! `409 Conflict`.
//!
//! All origins, methods, and headers are permitted so browser-based clients
//! can talk to a locally running instance.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::indexer::{IndexService, PROGRESS_STATUS_COMPLETE, PROGRESS_STATUS_FAILED};
use crate::kvstore::MetadataStore;
use crate::models::SearchResponse;
use crate::searchdb::SearchDb;

const DEFAULT_RESULTS_PER_PAGE: usize = 20;
const MAX_RESULTS_PER_PAGE: usize = 100;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<IndexService>,
    index: Arc<SearchDb>,
}

/// Starts the HTTP server and blocks until shutdown.
///
/// Opens both stores, spawns the build worker, and serves until a ctrl-c
/// signal arrives. Shutdown cancels any in-flight build through the
/// coordinator's token, then closes both stores; close errors are logged,
/// not propagated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = MetadataStore::open(config).await?;
    let index = Arc::new(SearchDb::open(config)?);

    let shutdown = CancellationToken::new();
    let service = Arc::new(IndexService::new(store.clone(), index.clone(), shutdown.clone()).await);

    let state = AppState {
        service,
        index: index.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/index", post(handle_create_index))
        .route("/index/status/{request_id}", get(handle_index_status))
        .route("/search", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    store.close().await;
    if let Err(err) = index.close() {
        error!(err = %err, "error closing search index");
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    shutdown.cancel();
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<String>,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            errors: vec![self.message],
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

// ============ POST /index ============

#[derive(Deserialize)]
struct IndexRequest {
    path: String,
    #[serde(default)]
    exclude_folders: Vec<String>,
}

#[derive(Serialize)]
struct IndexResponse {
    request_id: String,
}

/// Handler for `POST /index`.
///
/// Validates the root and exclude paths, mints a request id, and hands the
/// build to the coordinator. Returns `202` with the id on success and `409`
/// when a build is already in flight.
async fn handle_create_index(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<(StatusCode, Json<IndexResponse>), AppError> {
    validate_root_path(&request.path).map_err(bad_request)?;
    validate_exclude_paths(&request.path, &request.exclude_folders).map_err(bad_request)?;

    let request_id = uuid::Uuid::new_v4().to_string();

    if let Err(err) = state
        .service
        .build(&request.path, request.exclude_folders, &request_id)
        .await
    {
        error!(err = %err, "failed to create index");
        return Err(match err {
            Error::BuildInProgress => AppError {
                status: StatusCode::CONFLICT,
                message:
                    "failed to start indexing, possibly because another indexing operation is in progress"
                        .to_string(),
            },
            other => internal_error(other.to_string()),
        });
    }

    Ok((StatusCode::ACCEPTED, Json(IndexResponse { request_id })))
}

pub fn validate_root_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("path must not be empty".to_string());
    }
    if path.contains('\0') {
        return Err("path must not contain null bytes".to_string());
    }
    let root = Path::new(path);
    if !root.is_absolute() {
        return Err("path must be absolute".to_string());
    }
    if !root.is_dir() {
        return Err(format!("path does not exist or is not a directory: {}", path));
    }
    Ok(())
}

pub fn validate_exclude_paths(root: &str, exclude_folders: &[String]) -> Result<(), String> {
    let prefix = format!("{}{}", root.trim_end_matches('/'), std::path::MAIN_SEPARATOR);
    for folder in exclude_folders {
        if folder == root {
            warn!(path = folder, "path to exclude is the same as index path");
            return Err("path to exclude cannot be the same as index path".to_string());
        }
        if !folder.starts_with(&prefix) {
            warn!(path = folder, "path to exclude is not under index path");
            return Err("path to exclude must begin with the index path".to_string());
        }
    }
    Ok(())
}

// ============ GET /index/status/{request_id} ============

#[derive(Serialize)]
struct IndexStatusResponse {
    request_id: String,
    status: i64,
}

/// Handler for `GET /index/status/{request_id}`.
///
/// Maps the stored status integer to an HTTP code: complete → `200`,
/// failed → `500`, anything in between → `202`, unknown id → `404`.
async fn handle_index_status(
    State(state): State<AppState>,
    AxumPath(request_id): AxumPath<String>,
) -> Response {
    let status = match state.service.get_status(&request_id).await {
        Ok(status) => status,
        Err(Error::NotFound(_)) => {
            return AppError {
                status: StatusCode::NOT_FOUND,
                message: "request not found".to_string(),
            }
            .into_response();
        }
        Err(err) => {
            error!(request_id, err = %err, "failed to get index status");
            return internal_error(err.to_string()).into_response();
        }
    };

    let code = response_status_for(status);
    (code, Json(IndexStatusResponse { request_id, status })).into_response()
}

fn response_status_for(status: i64) -> StatusCode {
    match status {
        PROGRESS_STATUS_COMPLETE => StatusCode::OK,
        PROGRESS_STATUS_FAILED => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::ACCEPTED,
    }
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    per_page: Option<usize>,
    page: Option<usize>,
}

/// Handler for `GET /search`.
///
/// Paginated ranked search; defaults to 20 results per page, page 1.
async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let per_page = params.per_page.unwrap_or(DEFAULT_RESULTS_PER_PAGE);
    if per_page == 0 || per_page > MAX_RESULTS_PER_PAGE {
        return Err(bad_request(format!(
            "per_page must be between 1 and {}",
            MAX_RESULTS_PER_PAGE
        )));
    }

    let page = params.page.unwrap_or(1);
    if page == 0 {
        return Err(bad_request("page must be at least 1"));
    }

    let offset = (page - 1) * per_page;
    info!(query = %params.query, limit = per_page, offset, "performing search");

    let response = state.index.search(&params.query, per_page, offset).map_err(|err| {
        error!(err = %err, "search failed");
        internal_error(err.to_string())
    })?;

    info!(
        total_results = response.total,
        returned_results = response.results.len(),
        "search completed"
    );
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
