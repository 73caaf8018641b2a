//! `GET /api/ws` upgrade (spec §4.7): registers the socket with the `WsHub`
//! and pumps hub deliveries into the WebSocket write half. Read side only
//! exists to notice client-initiated close; Healarr's WS surface is
//! server-push only.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::app_state::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle(socket, state))
}

async fn handle(socket: WebSocket, state: AppState) {
    let Some(mut client) = state.ws_hub.register().await else {
        return;
    };
    let (mut sender, mut receiver) = socket.split();

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let mut write_task = tokio::spawn(async move {
        while let Some(event) = client.recv().await {
            let Ok(payload) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }
}
