use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::AppState;
use crate::{auth::CurrentUser, notify::NotificationHub};

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: CurrentUser,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| session(socket, hub, user.id))
}

async fn session(socket: WebSocket, hub: NotificationHub, member: Uuid) {
    let mut frames = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(%member, connected = hub.connected(), "websocket opened");

    loop {
        tokio::select! {
            envelope = frames.recv() => match envelope {
                Ok(envelope) if envelope.is_for(member) => {
                    let text = match serde_json::to_string(&envelope.frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("failed to encode frame: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(%member, skipped, "websocket lagged, skipping frames");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%member, "websocket error: {e}");
                    break;
                }
            },
        }
    }

    tracing::debug!(%member, "websocket closed");
}
