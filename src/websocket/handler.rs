use std::sync::Arc;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Uri,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::utils::shutdown_requested;
use crate::websocket::membership::RoomMembership;
use crate::ws::{ClientHandle, DocId};
use crate::AppState;

/// WebSocket handler, mounted on every path: the path names the document.
pub async fn websocket_handler(
    State(app_state): State<Arc<AppState>>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let doc_id = DocId::from_path(uri.path());
    debug!("WebSocket upgrade requested for document {}", doc_id);
    ws.on_upgrade(move |socket| handle_socket(socket, doc_id, app_state))
}

/// Handle one client connection for its whole lifetime
async fn handle_socket(socket: WebSocket, doc_id: DocId, app_state: Arc<AppState>) {
    let (client, mut outbound) = ClientHandle::channel();
    let conn_id = client.id();
    let (mut sender, mut receiver) = socket.split();

    // Join the room; a non-empty state is already queued as the first outbound frame
    let membership = match app_state.registry.join(&doc_id, client).await {
        Ok((room, _)) => RoomMembership::new(app_state.registry.clone(), room, conn_id),
        Err(e) => {
            warn!("Refusing connection {} to document {}: {}", conn_id, doc_id, e);
            let close = CloseFrame {
                code: close_code::ERROR,
                reason: "document unavailable".into(),
            };
            let _ = sender.send(Message::Close(Some(close))).await;
            return;
        }
    };
    info!("WebSocket connection {} established for document {}", conn_id, doc_id);

    // Apply every inbound binary frame to the room
    let room = membership.room().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Binary(payload)) => {
                    room.apply_update(conn_id, payload);
                }
                Ok(Message::Close(_)) => break,
                // Text, ping and pong frames carry no updates
                Ok(_) => {}
                Err(e) => {
                    debug!("Transport error on connection {}: {}", conn_id, e);
                    break;
                }
            }
        }
    });

    // Forward snapshot and broadcasts to the client until it goes away or the server stops
    let mut shutdown = app_state.shutdown.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    // The room only drops our sender when this client fell behind
                    let Some(payload) = frame else {
                        let close = CloseFrame {
                            code: close_code::AGAIN,
                            reason: "client too slow".into(),
                        };
                        let _ = sender.send(Message::Close(Some(close))).await;
                        break;
                    };
                    if sender.send(Message::Binary(payload)).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    let close = CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    };
                    let _ = sender.send(Message::Close(Some(close))).await;
                    break;
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut recv_task) => send_task.abort(),
        _ = (&mut send_task) => recv_task.abort(),
    };

    membership.leave().await;
    info!("WebSocket connection {} to document {} terminated", conn_id, doc_id);
}
