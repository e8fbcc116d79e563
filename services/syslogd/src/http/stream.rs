use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::http::logs::MessageDto;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    md5: String,
}

/// `WS /stream?md5=<fingerprint>`: one JSON object per message, live, for
/// as long as the client stays connected.
pub async fn ws_stream(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<StreamQuery>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state, query.md5))
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState, fingerprint: String) {
    let mut subscription = state.ring.subscribe_fingerprint(&fingerprint);
    while let Some(message) = subscription.rx.recv().await {
        let dto = MessageDto::from(message.as_ref());
        let Ok(json) = serde_json::to_string(&dto) else { continue };
        if socket.send(WsMessage::Text(json.into())).await.is_err() {
            break;
        }
    }
    state.ring.unsubscribe(&fingerprint, &subscription);
}
