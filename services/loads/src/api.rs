use crate::activity_log::{ActivityEntry, ActivityLog};
use crate::analytics::{AnalyticsResult, AnalyticsService, PriceOverrides};
use crate::archival::{ArchivalService, PurgeReport, SweepReport};
use crate::cache::MemoryKvStore;
use crate::config::ApiConfig;
use crate::model::DriverFuelProfile;
use crate::normalizer::{normalize_batch, RawRow};
use crate::photos::{PhotoReport, PhotoSanitizer};
use crate::store::LoadStore;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LoadStore>,
    pub archival: Arc<ArchivalService>,
    pub analytics: Arc<AnalyticsService<MemoryKvStore>>,
    pub photos: Arc<PhotoSanitizer>,
    pub activity: Arc<ActivityLog>,
    pub clock: Arc<dyn Clock>,
    pub archive_secret: Option<String>,
    pub secret_header: String,
    pub default_purge_days: u32,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: impl std::fmt::Display, what: &str) -> ApiError {
    error!(error = %e, "{what}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, what, "STORE_ERROR")
}

/// Query parameters for purge
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeQuery {
    pub older_than_days: Option<u32>,
}

/// Bulk import request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub owner_id: String,
    pub rows: Vec<RawRow>,
}

/// Bulk import outcome; `ids` lists only the rows that were stored
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
    pub failed: usize,
    pub ids: Vec<String>,
}

/// Photo update request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotosRequest {
    pub photos: Vec<String>,
    #[serde(default)]
    pub primary_photo: Option<String>,
}

/// Analytics request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRequest {
    pub driver: DriverFuelProfile,
    #[serde(default)]
    pub price_overrides: Option<PriceOverrides>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/archive/run", post(run_archive))
        .route("/api/v1/archive/purge", post(run_purge))
        .route("/api/v1/loads/import", post(import_loads))
        .route("/api/v1/loads/:load_id/photos", put(update_photos))
        .route("/api/v1/loads/:load_id/analytics", post(load_analytics))
        .route("/api/v1/activity", get(list_activity).delete(clear_activity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let app = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(address = %addr, "API server listening");

    axum::serve(listener, app).await.context("API server error")?;

    Ok(())
}

/// Check the shared secret header.
///
/// With no secret configured every trigger call is rejected.
pub fn authorize(headers: &HeaderMap, header_name: &str, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = secret.filter(|s| !s.is_empty()) else {
        warn!("Archive trigger called but no secret is configured");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized", "UNAUTHORIZED"));
    };

    let provided = headers.get(header_name).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized", "UNAUTHORIZED"));
    }

    Ok(())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "loads-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Archive eligible loads now
#[instrument(skip(state, headers))]
async fn run_archive(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, ApiError> {
    authorize(&headers, &state.secret_header, state.archive_secret.as_deref())?;

    let report = state
        .archival
        .archive_now()
        .await
        .map_err(|e| store_error(e, "Archive sweep failed"))?;

    Ok(Json(report))
}

/// Purge archived loads older than the given threshold
#[instrument(skip(state, headers))]
async fn run_purge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PurgeQuery>,
) -> Result<Json<PurgeReport>, ApiError> {
    authorize(&headers, &state.secret_header, state.archive_secret.as_deref())?;

    let days = params.older_than_days.unwrap_or(state.default_purge_days);
    let report = state
        .archival
        .purge_now(days)
        .await
        .map_err(|e| store_error(e, "Purge failed"))?;

    Ok(Json(report))
}

/// Normalize and insert a batch of import rows.
///
/// A failed insert does not abort the batch. The caller gets the ids that
/// were stored and a count of those that were not.
#[instrument(skip(state, request), fields(rows = request.rows.len()))]
async fn import_loads(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let records = normalize_batch(&request.rows, &request.owner_id, state.clock.utc())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, &e.to_string(), "BAD_REQUEST"))?;

    let mut ids = Vec::with_capacity(records.len());
    let mut failed = 0;
    for record in &records {
        match state.store.insert(record).await {
            Ok(()) => ids.push(record.id.clone()),
            Err(e) => {
                warn!(load_id = %record.id, error = %e, "Failed to insert load");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        metrics::counter!("loads.import.failures").increment(failed as u64);
    }
    state
        .activity
        .append(format!(
            "imported {} loads for {} ({failed} failed)",
            ids.len(),
            request.owner_id.trim()
        ))
        .await;

    Ok(Json(ImportResponse {
        imported: ids.len(),
        failed,
        ids,
    }))
}

/// Replace a load's photos with the sanitized subset
#[instrument(skip(state, request))]
async fn update_photos(
    State(state): State<AppState>,
    Path(load_id): Path<String>,
    Json(request): Json<PhotosRequest>,
) -> Result<Json<PhotoReport>, ApiError> {
    let mut load = state
        .store
        .get(&load_id)
        .await
        .map_err(|e| store_error(e, "Failed to get load"))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Load not found", "NOT_FOUND"))?;

    let report = state
        .photos
        .apply(&mut load, &request.photos, request.primary_photo.as_deref());

    state
        .store
        .save(&load)
        .await
        .map_err(|e| store_error(e, "Failed to save load"))?;

    Ok(Json(report))
}

/// Fuel analytics for a load under a driver profile
#[instrument(skip(state, request))]
async fn load_analytics(
    State(state): State<AppState>,
    Path(load_id): Path<String>,
    Json(request): Json<AnalyticsRequest>,
) -> Result<Json<Option<AnalyticsResult>>, ApiError> {
    let load = state
        .store
        .get(&load_id)
        .await
        .map_err(|e| store_error(e, "Failed to get load"))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Load not found", "NOT_FOUND"))?;

    let result = state
        .analytics
        .analyze(&load, &request.driver, request.price_overrides.as_ref())
        .await;

    Ok(Json(result))
}

async fn list_activity(State(state): State<AppState>) -> Json<Vec<ActivityEntry>> {
    Json(state.activity.entries().await)
}

async fn clear_activity(State(state): State<AppState>) -> StatusCode {
    state.activity.clear().await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::config::{AnalyticsConfig, ArchivalConfig};
    use crate::model::{LoadRecord, LoadStatus};
    use crate::store::{MemoryLoadStore, MockLoadStore};
    use crate::test_support::MutableClock;
    use axum::http::HeaderValue;
    use chrono::{Duration, TimeZone, Utc};

    fn test_state(store: Arc<dyn LoadStore>) -> AppState {
        let clock = Arc::new(MutableClock::new(Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap()));
        let activity = Arc::new(ActivityLog::new(Arc::new(MemoryKvStore::new()), clock.clone(), 20));
        let archival = Arc::new(ArchivalService::new(
            &ArchivalConfig::default(),
            store.clone(),
            clock.clone(),
            activity.clone(),
        ));

        AppState {
            store,
            archival,
            analytics: Arc::new(AnalyticsService::new(
                TtlCache::with_clock(MemoryKvStore::new(), clock.clone()),
                &AnalyticsConfig::default(),
            )),
            photos: Arc::new(PhotoSanitizer::default()),
            activity,
            clock,
            archive_secret: Some("s3cret".to_string()),
            secret_header: "x-archive-secret".to_string(),
            default_purge_days: 30,
        }
    }

    fn secret_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-archive-secret", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(&secret_headers("s3cret"), "x-archive-secret", Some("s3cret")).is_ok());
        assert!(authorize(&secret_headers("wrong"), "x-archive-secret", Some("s3cret")).is_err());
        assert!(authorize(&HeaderMap::new(), "x-archive-secret", Some("s3cret")).is_err());

        let (status, _) = authorize(&secret_headers(""), "x-archive-secret", None).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_run_archive_requires_secret() {
        let state = test_state(Arc::new(MemoryLoadStore::new()));

        let denied = run_archive(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(denied.unwrap_err().0, StatusCode::UNAUTHORIZED);

        let Json(report) = run_archive(State(state), secret_headers("s3cret")).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_purge_uses_default_threshold() {
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let mut stale = LoadRecord::new("stale", "owner-1", now - Duration::days(90));
        stale.status = LoadStatus::Completed;
        stale.mark_archived(now - Duration::days(31));
        let store = Arc::new(MemoryLoadStore::with_records([stale]));
        let state = test_state(store.clone());

        let Json(report) = run_purge(
            State(state),
            secret_headers("s3cret"),
            Query(PurgeQuery { older_than_days: None }),
        )
        .await
        .unwrap();

        assert_eq!(report, PurgeReport { scanned: 1, deleted: 1 });
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_import_then_photos_then_analytics() {
        let store = Arc::new(MemoryLoadStore::new());
        let state = test_state(store.clone());

        let rows: Vec<RawRow> = vec![serde_json::json!({ "rate": "1500", "distanceMiles": "300" })
            .as_object()
            .cloned()
            .unwrap()];
        let Json(imported) = import_loads(
            State(state.clone()),
            Json(ImportRequest {
                owner_id: "owner-1".to_string(),
                rows,
            }),
        )
        .await
        .unwrap();
        assert_eq!(imported.imported, 1);
        let id = imported.ids[0].clone();

        let Json(photos) = update_photos(
            State(state.clone()),
            Path(id.clone()),
            Json(PhotosRequest {
                photos: vec!["https://x.com/a.jpg".to_string(), "ftp://x.com/b.jpg".to_string()],
                primary_photo: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(photos.valid, vec!["https://x.com/a.jpg"]);
        assert_eq!(store.get(&id).await.unwrap().unwrap().primary_photo, "https://x.com/a.jpg");

        let Json(analytics) = load_analytics(
            State(state),
            Path(id),
            Json(AnalyticsRequest {
                driver: DriverFuelProfile {
                    mpg_rated: Some(30.0),
                    fuel_type: None,
                },
                price_overrides: None,
            }),
        )
        .await
        .unwrap();
        let analytics = analytics.unwrap();
        assert_eq!(analytics.gallons_needed, 10.0);
        assert_eq!(analytics.gross_revenue, 1500.0);
    }

    fn import_rows(count: usize) -> Vec<RawRow> {
        (0..count)
            .map(|i| {
                serde_json::json!({ "rate": format!("{}", 1000 + i), "equipmentType": "Van" })
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_import_reports_partial_failures() {
        let mut mock = MockLoadStore::new();
        let mut calls = 0;
        mock.expect_insert().times(4).returning(move |_| {
            calls += 1;
            if calls == 3 {
                anyhow::bail!("store unavailable")
            }
            Ok(())
        });
        let state = test_state(Arc::new(mock));

        let Json(response) = import_loads(
            State(state.clone()),
            Json(ImportRequest {
                owner_id: "owner-1".to_string(),
                rows: import_rows(4),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.imported, 3);
        assert_eq!(response.failed, 1);
        assert_eq!(response.ids.len(), 3);

        let log = state.activity.entries().await;
        assert_eq!(log.last().unwrap().message, "imported 3 loads for owner-1 (1 failed)");
    }

    #[tokio::test]
    async fn test_import_rejects_missing_owner() {
        let state = test_state(Arc::new(MemoryLoadStore::new()));
        let result = import_loads(
            State(state),
            Json(ImportRequest {
                owner_id: " ".to_string(),
                rows: vec![RawRow::new()],
            }),
        )
        .await;

        assert_eq!(result.unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_load_is_not_found() {
        let state = test_state(Arc::new(MemoryLoadStore::new()));
        let result = update_photos(
            State(state),
            Path("missing".to_string()),
            Json(PhotosRequest {
                photos: vec![],
                primary_photo: None,
            }),
        )
        .await;

        assert_eq!(result.unwrap_err().0, StatusCode::NOT_FOUND);
    }
}
