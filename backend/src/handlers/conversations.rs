use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::handlers::{error_response, ApiResult};
use crate::models::Conversation;
use crate::services::Core;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
}

/// Message bodies travel elsewhere; this only tracks activity and unread counts.
pub async fn record_message(State(core): State<Core>, Json(req): Json<MessageRequest>) -> ApiResult<Conversation> {
    let conversation = core
        .engine
        .record_message(&req.sender_id, &req.recipient_id)
        .await
        .map_err(error_response)?;
    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub user_id: String,
    pub other_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub updated: bool,
}

pub async fn mark_read(State(core): State<Core>, Json(req): Json<ReadRequest>) -> ApiResult<ReadResponse> {
    let updated = core
        .engine
        .mark_read(&req.user_id, &req.other_user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(ReadResponse { updated }))
}
