use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::handlers::{error_response, ApiResult};
use crate::models::{Festival, FestivalStats, NewFestival, RoomMember};
use crate::services::Core;

pub async fn register_festival(State(core): State<Core>, Json(festival): Json<NewFestival>) -> ApiResult<Festival> {
    let festival = core.festivals.register(&festival).await.map_err(error_response)?;
    Ok(Json(festival))
}

pub async fn get_festival(State(core): State<Core>, Path(festival_id): Path<String>) -> ApiResult<Festival> {
    let festival = core
        .festivals
        .get(&festival_id)
        .await
        .and_then(|found| found.ok_or_else(|| CoreError::NotFound(format!("festival {}", festival_id))))
        .map_err(error_response)?;
    Ok(Json(festival))
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: String,
    /// The code scanned from the venue's QR code.
    pub festival_id: String,
}

pub async fn join_festival(State(core): State<Core>, Json(req): Json<JoinRequest>) -> ApiResult<Festival> {
    let festival = core
        .festivals
        .join(&req.user_id, &req.festival_id)
        .await
        .map_err(error_response)?;
    Ok(Json(festival))
}

#[derive(Debug, Deserialize)]
pub struct LeaveRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub left: bool,
}

pub async fn leave_festival(State(core): State<Core>, Json(req): Json<LeaveRequest>) -> ApiResult<LeaveResponse> {
    let left = core.festivals.leave(&req.user_id).await.map_err(error_response)?;
    Ok(Json(LeaveResponse { left }))
}

pub async fn current_festival(State(core): State<Core>, Path(user_id): Path<String>) -> ApiResult<Option<Festival>> {
    let festival = core.festivals.current(&user_id).await.map_err(error_response)?;
    Ok(Json(festival))
}

pub async fn festival_members(
    State(core): State<Core>,
    Path((festival_id, user_id)): Path<(String, String)>,
) -> ApiResult<Vec<RoomMember>> {
    let members = core
        .festivals
        .members(&festival_id, &user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(members))
}

pub async fn festival_stats(State(core): State<Core>, Path(festival_id): Path<String>) -> ApiResult<FestivalStats> {
    let stats = core.festivals.stats(&festival_id).await.map_err(error_response)?;
    Ok(Json(stats))
}
