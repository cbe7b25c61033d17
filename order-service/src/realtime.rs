use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use shared::RealtimeEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, warn};
use crate::api::AppState;

/// Upgrades to a WebSocket that receives every event published from now on.
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.bus.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

async fn forward_events(socket: WebSocket, mut events: broadcast::Receiver<RealtimeEvent>) {
    let (mut sender, mut receiver) = socket.split();
    debug!("Realtime subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Realtime subscriber lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Realtime subscriber disconnected");
}
