pub mod conversations;
pub mod events;
pub mod exchanges;
pub mod festivals;
pub mod flicks;
pub mod users;

use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::error;

use crate::error::CoreError;
use crate::services::Core;

pub use conversations::{mark_read, record_message};
pub use events::event_stream;
pub use exchanges::{accept_exchange, active_exchange, close_exchange, decline_exchange, request_exchange};
pub use festivals::{
    current_festival, festival_members, festival_stats, get_festival, join_festival, leave_festival, register_festival,
};
pub use flicks::{list_flicks, list_matches, send_flick, unflick};
pub use users::{heartbeat, logout, nearby, set_status, upsert_user};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn error_response(err: CoreError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        CoreError::PolicyBlocked(_) => StatusCode::FORBIDDEN,
        CoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    let message = match status {
        StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
        _ => err.to_string(),
    };
    (status, Json(ApiError { error: message }))
}

pub fn router(core: Core) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(users::upsert_user))
        .route("/api/users/{id}/status", post(users::set_status))
        .route("/api/users/{id}/matches", get(flicks::list_matches))
        .route("/api/users/{id}/flicks", get(flicks::list_flicks))
        .route("/api/users/{id}/exchange", get(exchanges::active_exchange))
        .route("/api/users/{id}/festival", get(festivals::current_festival))
        .route("/api/heartbeat", post(users::heartbeat))
        .route("/api/nearby", post(users::nearby))
        .route("/api/logout", post(users::logout))
        .route("/api/flicks", post(flicks::send_flick).delete(flicks::unflick))
        .route("/api/exchanges", post(exchanges::request_exchange))
        .route("/api/exchanges/{id}/accept", post(exchanges::accept_exchange))
        .route("/api/exchanges/{id}/decline", post(exchanges::decline_exchange))
        .route("/api/exchanges/{id}/close", post(exchanges::close_exchange))
        .route("/api/festivals", post(festivals::register_festival))
        .route("/api/festivals/join", post(festivals::join_festival))
        .route("/api/festivals/leave", post(festivals::leave_festival))
        .route("/api/festivals/{id}", get(festivals::get_festival))
        .route("/api/festivals/{id}/stats", get(festivals::festival_stats))
        .route("/api/festivals/{id}/members/{user_id}", get(festivals::festival_members))
        .route("/api/conversations/messages", post(conversations::record_message))
        .route("/api/conversations/read", post(conversations::mark_read))
        .route("/api/events/{user_id}", get(events::event_stream))
        .with_state(core)
}

async fn health_check() -> &'static str {
    "OK"
}
