use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::handlers::{error_response, ApiResult};
use crate::models::{Exchange, ExchangeView};
use crate::services::{AcceptOutcome, Core, RequestOutcome};

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub from_user_id: String,
    pub to_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub created: bool,
    pub exchange: Option<ExchangeView>,
}

/// Opens an exchange using both users' stored phone numbers.
pub async fn request_exchange(
    State(core): State<Core>,
    Json(req): Json<ExchangeRequest>,
) -> ApiResult<ExchangeResponse> {
    let outcome = core
        .vault
        .request_from_profiles(&req.from_user_id, &req.to_user_id)
        .await
        .map_err(error_response)?;

    if let RequestOutcome::Created(exchange) = &outcome {
        core.vault.spawn_timer(exchange);
    }
    Ok(Json(ExchangeResponse {
        created: matches!(outcome, RequestOutcome::Created(_)),
        exchange: outcome.exchange().view_for(&req.from_user_id, core.clock.now()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_id: String,
}

pub async fn accept_exchange(
    State(core): State<Core>,
    Path(exchange_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Option<ExchangeView>> {
    let outcome = core
        .vault
        .accept(exchange_id, &req.user_id)
        .await
        .map_err(error_response)?;

    let exchange = match outcome {
        AcceptOutcome::Accepted(exchange) => {
            watch_for_participants(&core, &exchange);
            exchange
        }
        AcceptOutcome::AlreadyAccepted(exchange) => exchange,
        AcceptOutcome::NotFound => return Ok(Json(None)),
    };
    Ok(Json(exchange.view_for(&req.user_id, core.clock.now())))
}

/// Hands the proximity loop to whichever participant has a live session.
fn watch_for_participants(core: &Core, exchange: &Exchange) {
    for user_id in [&exchange.user_a_id, &exchange.user_b_id] {
        if let Some(session) = core.scheduler.get(user_id) {
            session.watch_exchange(exchange.id);
            return;
        }
    }
    debug!("No live session to watch exchange {}", exchange.id);
}

#[derive(Debug, Serialize)]
pub struct DestroyResponse {
    pub destroyed: bool,
}

pub async fn decline_exchange(
    State(core): State<Core>,
    Path(exchange_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<DestroyResponse> {
    let destroyed = core
        .vault
        .decline(exchange_id, &req.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(DestroyResponse { destroyed }))
}

pub async fn close_exchange(
    State(core): State<Core>,
    Path(exchange_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<DestroyResponse> {
    let destroyed = core
        .vault
        .close(exchange_id, &req.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(DestroyResponse { destroyed }))
}

pub async fn active_exchange(
    State(core): State<Core>,
    Path(user_id): Path<String>,
) -> ApiResult<Option<ExchangeView>> {
    let exchange = core
        .vault
        .active_for_user(&user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(exchange.and_then(|e| e.view_for(&user_id, core.clock.now()))))
}
