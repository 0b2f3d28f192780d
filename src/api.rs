// 🌐 REST API - axum router over the reference store
// Every handler answers with the `{ success, data?, error? }` envelope.
// The SQLite lock is held only while rows are fetched; scoring runs after.

use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::db::{count_distinct_counties, get_all_measures, get_measures};
use crate::locations::{self, LocationSearch};
use crate::rankings::{rank_page, QueryError, RankingQuery};
use crate::scoring::score_county_detail;

// ============================================================================
// STATE
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn open(path: &FsPath) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        info!("Database opened: {:?}", path);
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with the connection locked
    fn with_db<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, AppError>
    where
        AppError: From<E>,
    {
        let conn = self
            .db
            .lock()
            .map_err(|_| AppError::Internal("database lock poisoned".to_string()))?;
        Ok(f(&*conn)?)
    }
}

// ============================================================================
// RESPONSES & ERRORS
// ============================================================================

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            count: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            count: None,
            data: None,
            error: Some(message),
        }
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn list(data: Vec<T>) -> Self {
        Self {
            count: Some(data.len()),
            ..Self::ok(data)
        }
    }
}

/// Envelope for payloads that carry their own paging fields
#[derive(Debug, Serialize)]
pub struct PagedResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub page: T,
}

impl<T> PagedResponse<T> {
    pub fn ok(page: T) -> Self {
        Self { success: true, page }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidParameter { .. } | QueryError::MissingParameter(_) => {
                AppError::BadRequest(e.to_string())
            }
            QueryError::Store(inner) => AppError::Internal(format!("{:#}", inner)),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(msg) => {
                error!("Request failed: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    Ok(query?.0)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/health_rankings", get(health_rankings))
        .route("/api/health_rankings/:county/:state", get(county_health))
        .route("/api/county_data", get(county_list))
        .route("/api/county_data/:county", get(county_detail))
        .route("/api/zip/:zip", get(zip_lookup))
        .route("/api/location/zip/:zip", get(zip_detail))
        .route("/api/search", get(county_search))
        .route("/api/stats", get(dataset_stats))
        .route("/api/location/cities", get(city_list))
        .route("/api/location/states", get(state_list))
        .route("/api/location/states/:state", get(state_detail))
        .route("/api/location/metro_areas/:metro", get(metro_detail))
        .route("/api/location/search", get(location_search))
        .route("/api/location/analytics", get(location_analytics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

/// GET /api/health
async fn health_check() -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::ok(HealthStatus {
        status: "healthy",
        version: crate::VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /api/health_rankings?county&state&page&per_page
async fn health_rankings(
    State(state): State<AppState>,
    query: Result<Query<RankingQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let query = params(query)?;
    let pagination = query.pagination()?;
    let filter = query.filter();

    let (records, total) = state.with_db(|conn| -> anyhow::Result<_> {
        Ok((get_all_measures(conn, &filter)?, count_distinct_counties(conn, &filter)?))
    })?;

    let page = rank_page(&records, &filter, total.max(0) as usize, pagination);
    Ok(Json(PagedResponse::ok(page)))
}

/// GET /api/health_rankings/:county/:state
async fn county_health(
    State(state): State<AppState>,
    Path((county, state_code)): Path<(String, String)>,
) -> ApiResult<crate::scoring::CountyHealthDetail> {
    let measures = state.with_db(|conn| get_measures(conn, &county, &state_code))?;
    Ok(Json(ApiResponse::ok(score_county_detail(&county, &state_code, measures))))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    state: Option<String>,
    limit: Option<usize>,
}

impl ListQuery {
    fn state(&self) -> Option<&str> {
        self.state.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// GET /api/county_data?state&limit
async fn county_list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<locations::CountySummary>> {
    let query = params(query)?;
    let counties = state.with_db(|conn| locations::list_counties(conn, query.state(), query.limit))?;
    Ok(Json(ApiResponse::list(counties)))
}

/// GET /api/county_data/:county?state
async fn county_detail(
    State(state): State<AppState>,
    Path(county): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<locations::CountyDetails> {
    let query = params(query)?;
    state
        .with_db(|conn| locations::county_details(conn, &county, query.state()))?
        .map(|details| Json(ApiResponse::ok(details)))
        .ok_or_else(|| AppError::NotFound("County not found".to_string()))
}

/// GET /api/zip/:zip
async fn zip_lookup(
    State(state): State<AppState>,
    Path(zip): Path<String>,
) -> ApiResult<locations::ZipSummary> {
    state
        .with_db(|conn| locations::zip_summary(conn, zip.trim()))?
        .map(|summary| Json(ApiResponse::ok(summary)))
        .ok_or_else(|| AppError::NotFound("ZIP code not found".to_string()))
}

/// GET /api/location/zip/:zip
async fn zip_detail(
    State(state): State<AppState>,
    Path(zip): Path<String>,
) -> ApiResult<locations::ZipDetails> {
    state
        .with_db(|conn| locations::zip_details(conn, zip.trim()))?
        .map(|details| Json(ApiResponse::ok(details)))
        .ok_or_else(|| AppError::NotFound("ZIP code not found".to_string()))
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

/// GET /api/search?q
async fn county_search(
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Vec<locations::CountySummary>> {
    let query = params(query)?;
    let counties = state.with_db(|conn| locations::search_counties(conn, &query.q))?;
    Ok(Json(ApiResponse::list(counties)))
}

/// GET /api/stats
async fn dataset_stats(State(state): State<AppState>) -> ApiResult<locations::DatasetStats> {
    let stats = state.with_db(locations::stats)?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// GET /api/location/cities?state&limit
async fn city_list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<locations::CitySummary>> {
    let query = params(query)?;
    let cities = state.with_db(|conn| locations::list_cities(conn, query.state(), query.limit))?;
    Ok(Json(ApiResponse::list(cities)))
}

/// GET /api/location/states?limit
async fn state_list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<locations::StateSummary>> {
    let query = params(query)?;
    let states = state.with_db(|conn| locations::list_states(conn, query.limit))?;
    Ok(Json(ApiResponse::list(states)))
}

/// GET /api/location/states/:state
async fn state_detail(
    State(state): State<AppState>,
    Path(state_code): Path<String>,
) -> ApiResult<locations::StateDetails> {
    let state_code = state_code.trim().to_uppercase();
    state
        .with_db(|conn| locations::state_details(conn, &state_code))?
        .map(|details| Json(ApiResponse::ok(details)))
        .ok_or_else(|| AppError::NotFound(format!("State {} not found", state_code)))
}

/// GET /api/location/metro_areas/:metro
async fn metro_detail(
    State(state): State<AppState>,
    Path(metro): Path<String>,
) -> ApiResult<locations::MetroDetails> {
    state
        .with_db(|conn| locations::metro_details(conn, &metro))?
        .map(|details| Json(ApiResponse::ok(details)))
        .ok_or_else(|| AppError::NotFound(format!("Metro area {} not found", metro)))
}

#[derive(Debug, Default, Deserialize)]
struct LocationSearchQuery {
    #[serde(default)]
    q: String,
    #[serde(rename = "type")]
    scope: Option<String>,
    state: Option<String>,
    limit: Option<usize>,
}

/// GET /api/location/search?q&type&state&limit
async fn location_search(
    State(state): State<AppState>,
    query: Result<Query<LocationSearchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let query = params(query)?;
    let search = LocationSearch {
        q: query.q,
        scope: query.scope,
        state: query.state,
        limit: query.limit,
    };

    let results = state.with_db(|conn| locations::search_locations(conn, &search))?;
    Ok(Json(PagedResponse::ok(results)))
}

/// GET /api/location/analytics
async fn location_analytics(State(state): State<AppState>) -> ApiResult<locations::Analytics> {
    let analytics = state.with_db(locations::analytics)?;
    Ok(Json(ApiResponse::ok(analytics)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_errors_map_to_bad_request() {
        let err: AppError = QueryError::MissingParameter("q").into();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err: AppError = QueryError::Store(anyhow::anyhow!("disk gone")).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(ApiResponse::list(vec![1, 2])).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["count"], 2);
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(ApiResponse::<()>::failure("nope".to_string())).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "nope");
        assert!(failed.get("data").is_none());
    }
}
