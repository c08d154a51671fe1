use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::Coordinate;
use crate::handlers::{error_response, ApiResult};
use crate::models::{NearbyFilter, NearbyUser, NewUser, User};
use crate::services::{BeatReport, Core, LogoutReport};

pub async fn upsert_user(State(core): State<Core>, Json(profile): Json<NewUser>) -> ApiResult<User> {
    let user = core.presence.upsert_user(&profile).await.map_err(error_response)?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user_id: String,
    pub status: bool,
    pub heartbeat_running: bool,
}

/// Toggles availability; the user's presence session follows the flag.
pub async fn set_status(
    State(core): State<Core>,
    Path(user_id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<StatusResponse> {
    core.presence.require_user(&user_id).await.map_err(error_response)?;
    let heartbeat_running = core
        .scheduler
        .set_available(&user_id, req.status)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        user_id,
        status: req.status,
        heartbeat_running,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub user_id: String,
    #[serde(default)]
    pub location: Option<Coordinate>,
}

/// Client-reported fix. Stores it, then runs the geofence sweep for the user.
pub async fn heartbeat(State(core): State<Core>, Json(req): Json<HeartbeatRequest>) -> ApiResult<BeatReport> {
    core.presence
        .heartbeat(&req.user_id, req.location)
        .await
        .map_err(error_response)?;
    let dissolved = core
        .engine
        .geofence_sweep(&req.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(BeatReport {
        location_known: req.location.is_some(),
        heartbeat_stored: true,
        dissolved,
    }))
}

#[derive(Debug, Deserialize)]
pub struct NearbyRequest {
    pub user_id: String,
    pub location: Coordinate,
    #[serde(default)]
    pub radius_meters: Option<f64>,
    /// Apply the caller's stored gender preferences.
    #[serde(default)]
    pub filter_by_preferences: bool,
}

pub async fn nearby(State(core): State<Core>, Json(req): Json<NearbyRequest>) -> ApiResult<Vec<NearbyUser>> {
    let filter = if req.filter_by_preferences {
        let me = core.presence.require_user(&req.user_id).await.map_err(error_response)?;
        Some(NearbyFilter::for_user(&me))
    } else {
        None
    };
    let radius = req
        .radius_meters
        .unwrap_or(core.settings.proximity_radius_meters);
    let users = core
        .presence
        .nearby(&req.user_id, &req.location, radius, filter)
        .await
        .map_err(error_response)?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub user_id: String,
}

pub async fn logout(State(core): State<Core>, Json(req): Json<LogoutRequest>) -> ApiResult<LogoutReport> {
    if !crate::constants::is_valid_user_id(&req.user_id) {
        return Err(error_response(CoreError::Invalid(format!(
            "malformed user id: {:?}",
            req.user_id
        ))));
    }
    Ok(Json(core.teardown.logout(&req.user_id).await))
}
