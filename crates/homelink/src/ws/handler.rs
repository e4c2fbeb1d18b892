//! WebSocket connection handling for hubs.

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};

use crate::api::AppState;
use crate::registry::HubTransport;

/// Upgrade `/hub-channel/{hub_id}` (and the legacy `/ws/hub/{hub_id}`).
pub async fn hub_channel_handler(
    ws: WebSocketUpgrade,
    Path(hub_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_hub_socket(socket, hub_id, state))
}

async fn handle_hub_socket(socket: WebSocket, hub_id: String, state: AppState) {
    let (transport, mut outbound) = HubTransport::channel(state.channel_capacity);
    let closed = transport.closed_token();
    let handle = state.registry.connect(&hub_id, transport);

    let (mut sink, mut stream) = socket.split();

    // Drain the registry's queue into the socket.
    let send_hub_id = hub_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {} for hub {}: {}", message.kind(), send_hub_id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                debug!("Hub {} socket closed while sending", send_hub_id);
                break;
            }
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("Close frame to hub {} not sent: {}", send_hub_id, e);
        }
    });

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                info!("Hub {} session {} closed by server", hub_id, handle.session_id);
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.protocol.handle_text(&handle, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Ignoring binary frame from hub {}", hub_id);
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Hub {} closed the connection", hub_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Hub {} connection error: {}", hub_id, e);
                    break;
                }
            }
        }
    }

    // A superseded session must not take its replacement offline.
    if state.registry.release(&handle) {
        match state.state.set_hub_online(&hub_id, false).await {
            Ok(true) => info!("Hub {} marked offline", hub_id),
            Ok(false) => {}
            Err(e) => error!("Failed to mark hub {} offline: {}", hub_id, e),
        }
    }
    closed.cancel();

    if let Err(e) = send_task.await {
        warn!("Send task for hub {} ended abnormally: {}", hub_id, e);
    }
}
