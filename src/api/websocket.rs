//! WebSocket handler for the observer control channel

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
///
/// The observer is registered before the current configuration is queued,
/// so the config is always the first frame it receives.
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let protocol = state.protocol;
    let broadcaster = protocol.broadcaster().clone();

    let (observer, mut outbound) = broadcaster.register().await;
    info!(%observer, "WebSocket client connected");

    if let Err(e) = protocol.on_connect(observer).await {
        debug!(%observer, "could not send initial config: {e}");
    }

    let (mut sender, mut receiver) = socket.split();

    // Forward queued events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                debug!(%observer, "WebSocket send failed, client disconnected");
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Handle incoming control messages
    let recv_protocol = protocol.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_protocol.dispatch(observer, &text).await,
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => recv_protocol.dispatch(observer, text).await,
                    Err(_) => debug!(%observer, "ignoring non UTF-8 binary frame"),
                },
                Message::Close(_) => break,
                _ => {
                    // Ping/pong are answered by axum
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    broadcaster.unregister(observer).await;
    info!(%observer, "WebSocket client disconnected");
}
