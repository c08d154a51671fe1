use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::events::Topic;
use crate::services::Core;

/// Streams the user's events as JSON text frames.
pub async fn event_stream(
    ws: WebSocketUpgrade,
    State(core): State<Core>,
    Path(user_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| forward_events(socket, core, user_id))
}

async fn forward_events(mut socket: WebSocket, core: Core, user_id: String) {
    let topic = Topic::user(&user_id);
    let mut events = core.bus.subscribe(topic.clone());
    debug!("Event stream opened for {}", user_id);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Failed to encode event for {}: {}", user_id, e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream for {} lagged, skipped {} events", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    drop(events);
    core.bus.release(&topic);
    debug!("Event stream closed for {}", user_id);
}
