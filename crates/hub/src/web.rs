use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use garden_core::{Zone, ZoneConfig, ZoneError};
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::db::{Db, NewPlant};
use crate::state::{SharedState, ZoneStatus};

const DEFAULT_READINGS_LIMIT: i64 = 50;
const MAX_READINGS_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl From<ZoneError> for ApiError {
    fn from(e: ZoneError) -> Self {
        match e {
            ZoneError::Invalid { .. } => Self::BadRequest(e.to_string()),
            ZoneError::Duplicate(_) => Self::Conflict(e.to_string()),
            ZoneError::NotFound(_) => Self::NotFound(e.to_string()),
            // The zone is still running and still controlled; retry later.
            ZoneError::PumpFailed { .. } => Self::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Internal(e) => {
                error!("api: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/tick", post(api_tick))
        .route("/api/stats", get(api_stats))
        .route("/api/zones", post(create_zone))
        .route("/api/zones/{zone_id}", delete(delete_zone))
        .route("/api/zones/{zone_id}/readings", get(zone_readings))
        .route("/api/zones/{zone_id}/plants", post(create_plant))
        .route("/api/plants/{plant_id}", delete(delete_plant))
        .with_state(state)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

async fn api_tick(State(app): State<AppState>) -> impl IntoResponse {
    let report = crate::scheduler::run_tick(&app.shared).await;
    Json(report)
}

async fn api_stats(State(app): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.db.reading_stats().await?))
}

// -- Zones --------------------------------------------------------------------

async fn create_zone(
    State(app): State<AppState>,
    Json(mut config): Json<ZoneConfig>,
) -> ApiResult<impl IntoResponse> {
    // Watering history only comes from pump events.
    config.last_watered = None;

    let mut st = app.shared.write().await;
    if st.controller.zone(&config.zone_id).is_some() {
        return Err(ZoneError::Duplicate(config.zone_id).into());
    }
    let zone = Zone::new(config.clone())?;

    app.db.upsert_zone(&config).await?;
    st.controller.add_zone(zone)?;
    st.controller.pump_mut().register(&config.zone_id);
    st.record_system(format!("zone {} added", config.zone_id));
    info!(zone = %config.zone_id, "zone added");

    let status = st
        .controller
        .zone(&config.zone_id)
        .map(ZoneStatus::from)
        .context("zone vanished after insert")?;
    Ok((StatusCode::CREATED, Json(status)))
}

async fn delete_zone(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
) -> ApiResult<StatusCode> {
    let mut st = app.shared.write().await;
    let removed = st.controller.remove_zone(&zone_id).await?;
    if let Err(e) = app.db.delete_zone(&zone_id).await {
        // The row is still there, so the zone stays under control.
        st.controller.add_zone(removed)?;
        return Err(e.into());
    }
    st.controller.pump_mut().unregister(&zone_id);
    st.record_system(format!("zone {zone_id} removed"));
    info!(zone = %zone_id, "zone removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    limit: Option<i64>,
}

async fn zone_readings(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
    Query(q): Query<ReadingsQuery>,
) -> ApiResult<impl IntoResponse> {
    if app.shared.read().await.controller.zone(&zone_id).is_none() {
        return Err(ZoneError::NotFound(zone_id).into());
    }
    let limit = q
        .limit
        .unwrap_or(DEFAULT_READINGS_LIMIT)
        .clamp(1, MAX_READINGS_LIMIT);
    Ok(Json(app.db.recent_readings(&zone_id, limit).await?))
}

// -- Plants -------------------------------------------------------------------

async fn create_plant(
    State(app): State<AppState>,
    Path(zone_id): Path<String>,
    Json(plant): Json<NewPlant>,
) -> ApiResult<impl IntoResponse> {
    if plant.name.trim().is_empty() {
        return Err(ApiError::BadRequest("plant name is empty".to_string()));
    }

    let mut st = app.shared.write().await;
    if st.controller.zone(&zone_id).is_none() {
        return Err(ZoneError::NotFound(zone_id).into());
    }

    let created = app.db.insert_plant(&zone_id, &plant).await?;
    st.controller.add_plant(&zone_id, created.clone())?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_plant(
    State(app): State<AppState>,
    Path(plant_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let mut st = app.shared.write().await;
    if !app.db.delete_plant(plant_id).await? {
        return Err(ApiError::NotFound(format!("plant {plant_id} not found")));
    }
    st.controller.remove_plant(plant_id);
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
