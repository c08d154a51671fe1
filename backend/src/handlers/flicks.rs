use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::handlers::{error_response, ApiResult};
use crate::models::Counterpart;
use crate::services::{Core, FlickLists, FlickOutcome};

#[derive(Debug, Deserialize)]
pub struct FlickRequest {
    pub from_user_id: String,
    pub to_user_id: String,
}

pub async fn send_flick(State(core): State<Core>, Json(req): Json<FlickRequest>) -> ApiResult<FlickOutcome> {
    let outcome = core
        .engine
        .send_flick(&req.from_user_id, &req.to_user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct UnflickResponse {
    pub removed: bool,
}

pub async fn unflick(State(core): State<Core>, Json(req): Json<FlickRequest>) -> ApiResult<UnflickResponse> {
    let removed = core
        .engine
        .unflick(&req.from_user_id, &req.to_user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(UnflickResponse { removed }))
}

pub async fn list_matches(State(core): State<Core>, Path(user_id): Path<String>) -> ApiResult<Vec<Counterpart>> {
    let matches = core.engine.matches(&user_id).await.map_err(error_response)?;
    Ok(Json(matches))
}

pub async fn list_flicks(State(core): State<Core>, Path(user_id): Path<String>) -> ApiResult<FlickLists> {
    let flicks = core.engine.flicks(&user_id).await.map_err(error_response)?;
    Ok(Json(flicks))
}
