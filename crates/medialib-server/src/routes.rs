//! HTTP routes.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use medialib_core::protocol::{ScanRequest, ValidateRequest};
use medialib_core::{AccessError, ConfigPatch, CoreError, MediaService};
use medialib_indexer::{epoch_seconds, MediaFilter, UnknownFilter};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;
use tower::ServiceExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeFile;
use tracing::{error, warn};

use crate::socket;

pub type SharedService = Arc<MediaService>;

/// Build the application router.
pub fn router(service: SharedService, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/media", get(list_media))
        .route("/media/*path", get(serve_media))
        .route("/random-media", get(random_media))
        .route("/scan", post(scan))
        .route("/cleanup", post(cleanup))
        .route("/config", get(get_config).post(update_config))
        .route("/validate-directory", post(validate_directory))
        .route("/ws", get(socket::ws_handler))
        .with_state(service)
        .layer(cors_layer(allowed_origins))
}

/// Any origin when the list is empty, otherwise exactly the listed ones.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Error body: `{"status": "error", "message": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let status = match &e {
            CoreError::InvalidDirectory(_) | CoreError::NoDirectory | CoreError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::ScanInProgress => StatusCode::CONFLICT,
            CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Indexer(_) => {
                error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        let status = match &e {
            AccessError::Forbidden(_) => StatusCode::FORBIDDEN,
            AccessError::NotFound(_) | AccessError::NotAFile(_) => StatusCode::NOT_FOUND,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<UnknownFilter> for ApiError {
    fn from(e: UnknownFilter) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RandomQuery {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

fn parse_filter(raw: Option<&str>) -> Result<MediaFilter, ApiError> {
    Ok(raw.unwrap_or_default().parse::<MediaFilter>()?)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": epoch_seconds(SystemTime::now()),
    }))
}

async fn status(State(service): State<SharedService>) -> impl IntoResponse {
    Json(service.status().await)
}

async fn list_media(
    State(service): State<SharedService>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(query.media_type.as_deref())?;
    Ok(Json(service.list(
        filter,
        query.limit.unwrap_or(0),
        query.offset.unwrap_or(0),
    )))
}

async fn random_media(
    State(service): State<SharedService>,
    Query(query): Query<RandomQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(query.media_type.as_deref())?;
    match service.random(filter) {
        Some(pick) => Ok(Json(pick)),
        None => {
            let message = match filter {
                MediaFilter::All => "No media available".to_string(),
                other => format!("No {} files available", other.as_str()),
            };
            Err(ApiError::new(StatusCode::NOT_FOUND, message))
        }
    }
}

/// Stream one file; Range requests get 206 responses.
async fn serve_media(
    State(service): State<SharedService>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let absolute = service.resolve_file(&path)?;
    match ServeFile::new(absolute).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn scan(State(service): State<SharedService>, body: Option<Json<ScanRequest>>) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    match service.trigger_scan(request).await {
        Ok(summary) => Json(summary).into_response(),
        Err(CoreError::ScanInProgress) => {
            let counts = service.counts();
            let body = Json(json!({
                "status": "error",
                "message": CoreError::ScanInProgress.to_string(),
                "total_count": counts.total,
                "image_count": counts.image,
                "video_count": counts.video,
            }));
            (StatusCode::CONFLICT, body).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn cleanup(State(service): State<SharedService>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.cleanup().await?))
}

async fn get_config(State(service): State<SharedService>) -> impl IntoResponse {
    Json(service.config())
}

async fn update_config(
    State(service): State<SharedService>,
    Json(patch): Json<ConfigPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.update_config(patch)?))
}

async fn validate_directory(
    State(service): State<SharedService>,
    Json(request): Json<ValidateRequest>,
) -> impl IntoResponse {
    Json(service.validate_directory(&request.path))
}
