use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use convoy_core::{ConvoyEvent, ConvoyId, Subscription, UserId};

use crate::infra::{
    app_state::AppState,
    errors::AppResult,
    websocket::{ClientFrame, Connection, ServerFrame, messages},
};

/// Outgoing frames a socket may queue besides convoy events
const SOCKET_FRAME_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketQuery {
    /// Member to tie the subscription to; omitted for observers
    pub user_id: Option<String>,
    /// With `userId`, join the convoy before subscribing
    pub display_name: Option<String>,
}

/// Handle WebSocket upgrade request.
///
/// The subscription is opened before the upgrade so unknown convoys and
/// non-members get a regular HTTP error.
pub async fn convoy_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(convoy_id): Path<String>,
    Query(query): Query<SocketQuery>,
) -> AppResult<Response> {
    let convoy_id = ConvoyId::parse(convoy_id)?;
    let member = query.user_id.map(UserId::parse).transpose()?;

    let subscription = match (&member, &query.display_name) {
        (Some(user_id), Some(display_name)) => {
            let (_, subscription) = state
                .service
                .connect(&convoy_id, user_id, display_name)
                .await?;
            subscription
        }
        _ => state.service.subscribe(&convoy_id, member.clone()).await?,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, subscription, member)))
}

/// Handle an individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    subscription: Subscription,
    member: Option<UserId>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(SOCKET_FRAME_BUFFER);

    let Subscription {
        id: subscription_id,
        convoy_id,
        events: mut convoy_events,
    } = subscription;

    let connection = Arc::new(Connection::new(
        convoy_id.clone(),
        member.clone(),
        subscription_id,
        tx,
    ));
    let conn_id = connection.id;
    state.websocket_manager.add_connection(connection.clone());

    info!(
        convoy = %convoy_id,
        user = ?member.as_ref().map(UserId::as_str),
        connection = %conn_id,
        sockets = state.websocket_manager.room_size(&convoy_id),
        "convoy socket connected"
    );

    // Writer: convoy events and direct replies share the socket. The
    // socket closes when the hub drops the subscription.
    let shutdown = state.shutdown.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = convoy_events.recv() => match event {
                    Some(event) => ServerFrame::Event { event },
                    None => break,
                },
                reply = rx.recv() => match reply {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match messages::frame_to_websocket(&frame) {
                Ok(msg) => {
                    if ws_sender.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode frame"),
            }
        }

        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Handle incoming messages
    loop {
        let msg = tokio::select! {
            _ = &mut writer => break,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                let reply = match messages::websocket_to_frame(&msg) {
                    Ok(frame) => handle_client_frame(frame, &state, &convoy_id).await,
                    Err(e) => Some(messages::error_frame("invalid_frame", e.to_string())),
                };
                if let Some(reply) = reply
                    && !connection.send_frame(reply).await
                {
                    break;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                debug!(error = %e, connection = %conn_id, "websocket error");
                break;
            }
        }
    }

    if !writer.is_finished() {
        writer.abort();
    }

    // Clean up on disconnect
    handle_disconnect(&state, conn_id);
}

/// Returns the direct reply, if any
async fn handle_client_frame(
    frame: ClientFrame,
    state: &AppState,
    convoy_id: &ConvoyId,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::Ping { .. } => Some(messages::create_pong()),
        ClientFrame::RequestSnapshot => match state.service.snapshot(convoy_id) {
            Ok(snapshot) => Some(ServerFrame::Event {
                event: ConvoyEvent::Snapshot { snapshot },
            }),
            Err(e) => Some(messages::error_frame(e.code(), e.to_string())),
        },
        ClientFrame::UpdatePosition { user_id, lat, lon } => {
            let result = match UserId::parse(user_id) {
                Ok(user_id) => {
                    state
                        .service
                        .update_position(convoy_id, &user_id, lat, lon)
                        .await
                }
                Err(e) => Err(e),
            };

            // The resulting position_updated event arrives through the
            // subscription, so success needs no reply
            result
                .err()
                .map(|e| messages::error_frame(e.code(), e.to_string()))
        }
    }
}

fn handle_disconnect(state: &AppState, conn_id: uuid::Uuid) {
    let Some(connection) = state.websocket_manager.remove_connection(conn_id) else {
        return;
    };

    state.service.unsubscribe(connection.subscription_id);
    info!(
        convoy = %connection.convoy_id,
        connection = %conn_id,
        "convoy socket disconnected"
    );
}
