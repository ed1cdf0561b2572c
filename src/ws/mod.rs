use crate::{
    ride::{
        ConnectionId, RideError,
        message::{ClientMessage, ServerMessage},
        session::Connection,
    },
    server::{AppState, Gateway, Heartbeat},
};
use axum::{
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Upgrades `/ws`. The connection starts unbound; the client must send
/// `join-ride` before anything else has an effect.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.gateway, state.heartbeat))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, heartbeat: Heartbeat) {
    let connection = gateway.connect();
    let connection_id = connection.id();
    tracing::info!(%connection_id, "WebSocket connection established");

    let (ws_sender, ws_receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(ws_sender));
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    // Task 1: gateway -> socket
    let mut outbound_task = spawn_outbound(connection, Arc::clone(&ws_sender));

    // Task 2: socket -> gateway
    let mut inbound_task = spawn_inbound(
        ws_receiver,
        Arc::clone(&gateway),
        connection_id,
        Arc::clone(&last_pong),
    );

    // Task 3: server pings, disconnect when pongs stop arriving
    let mut heartbeat_task = spawn_heartbeat(
        Arc::clone(&ws_sender),
        connection_id,
        heartbeat,
        Arc::clone(&last_pong),
    );

    tokio::select! {
        res = &mut outbound_task => {
            if let Err(e) = res {
                tracing::error!(%connection_id, "Outbound task panicked: {}", e);
            }
            inbound_task.abort();
            heartbeat_task.abort();
        },
        res = &mut inbound_task => {
            if let Err(e) = res {
                tracing::error!(%connection_id, "Inbound task panicked: {}", e);
            }
            outbound_task.abort();
            heartbeat_task.abort();
        },
        res = &mut heartbeat_task => {
            match res {
                Ok(Ok(())) => tracing::error!(%connection_id, "Heartbeat task completed unexpectedly"),
                Ok(Err(reason)) => tracing::info!(%connection_id, "Heartbeat task stopped: {}", reason),
                Err(e) => tracing::error!(%connection_id, "Heartbeat task panicked: {}", e),
            }
            outbound_task.abort();
            inbound_task.abort();
        }
    }

    if let Err(e) = ws_sender.lock().await.close().await {
        tracing::debug!(%connection_id, "Ignoring error closing WebSocket sender: {}", e);
    }

    gateway.disconnect(&connection_id);
    tracing::info!(%connection_id, "Client disconnected");
}

fn spawn_outbound(mut connection: Connection, ws_sender: WsSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let connection_id = connection.id();
        while let Some(msg) = connection.recv().await {
            let text = match Utf8Bytes::try_from(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(%connection_id, "Failed to serialize server message: {}", e);
                    continue;
                }
            };
            tracing::trace!(%connection_id, "Sending message to WebSocket: {}", text.as_str());
            if ws_sender.lock().await.send(Message::Text(text)).await.is_err() {
                tracing::warn!(%connection_id, "Failed to send message, client disconnected?");
                break;
            }
        }
        tracing::debug!(%connection_id, "Outbound task finished");
    })
}

fn spawn_inbound(
    mut receiver: SplitStream<WebSocket>,
    gateway: Arc<Gateway>,
    connection_id: ConnectionId,
    last_pong: Arc<Mutex<Instant>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg_result) = receiver.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(%connection_id, "WebSocket receive error: {}", e);
                    break;
                }
            };
            match msg {
                Message::Text(text) => dispatch_text(&gateway, connection_id, text).await,
                Message::Binary(bin) => {
                    tracing::warn!(%connection_id, "Received unexpected binary message ({} bytes)", bin.len());
                    reject_binary(&gateway, &connection_id);
                }
                // Pings are answered by the WebSocket layer.
                Message::Ping(_) => {}
                Message::Pong(_) => {
                    *last_pong.lock().await = Instant::now();
                }
                Message::Close(close_frame) => {
                    tracing::info!(%connection_id, "Received Close frame: {:?}", close_frame);
                    break;
                }
            }
        }
        tracing::debug!(%connection_id, "Inbound task finished");
    })
}

/// Parses one text frame and hands it to the gateway. Failures are reported
/// to this connection only.
async fn dispatch_text(gateway: &Gateway, connection_id: ConnectionId, text: Utf8Bytes) {
    let result = match ClientMessage::try_from(text) {
        Ok(client_msg) => gateway.handle_client_message(connection_id, client_msg).await,
        Err(e) => {
            tracing::warn!(%connection_id, "Failed to parse client message: {}", e);
            Err(RideError::InvalidMessage(e.to_string()))
        }
    };
    if let Err(e) = result {
        tracing::debug!(%connection_id, kind = e.kind(), "Rejected client message: {}", e);
        gateway.send_error(&connection_id, &e);
    }
}

fn reject_binary(gateway: &Gateway, connection_id: &ConnectionId) {
    gateway.send(
        connection_id,
        ServerMessage::error("Binary messages are not supported"),
    );
}

fn spawn_heartbeat(
    ws_sender: WsSender,
    connection_id: ConnectionId,
    heartbeat: Heartbeat,
    last_pong: Arc<Mutex<Instant>>,
) -> JoinHandle<Result<(), &'static str>> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat.interval);
        loop {
            interval.tick().await;

            if last_pong.lock().await.elapsed() > heartbeat.timeout {
                tracing::warn!(%connection_id, "Heartbeat timeout, disconnecting");
                return Err("Heartbeat Timeout");
            }

            tracing::trace!(%connection_id, "Sending Ping to client");
            if let Err(e) = ws_sender.lock().await.send(Message::Ping(Vec::new().into())).await {
                tracing::warn!(%connection_id, "Failed to send Ping: {}", e);
                return Err("Failed to send Ping");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        ride::{RideId, session::ConnectionState},
    };

    fn gateway() -> Arc<Gateway> {
        AppState::new(&Config::default()).gateway
    }

    fn is_error(message: &ServerMessage) -> bool {
        matches!(message, ServerMessage::Error { .. })
    }

    #[tokio::test]
    async fn malformed_frames_are_answered_to_the_sender_only() {
        let gateway = gateway();
        let mut bystander = gateway.connect();
        gateway
            .join(bystander.id(), RideId::new(1), "b", None)
            .await
            .unwrap();
        bystander.drain();
        let mut sender = gateway.connect();

        dispatch_text(&gateway, sender.id(), Utf8Bytes::from_static("{not json")).await;
        dispatch_text(
            &gateway,
            sender.id(),
            Utf8Bytes::from_static(r#"{"type":"join-ride","data":{"rideId":"abc","userId":"a"}}"#),
        )
        .await;
        dispatch_text(
            &gateway,
            sender.id(),
            Utf8Bytes::from_static(r#"{"type":"teleport","data":{}}"#),
        )
        .await;

        let replies = sender.drain();
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(is_error));
        assert!(bystander.drain().is_empty());
        assert_eq!(gateway.connection_state(&sender.id()), ConnectionState::Unbound);
    }

    #[tokio::test]
    async fn valid_frames_reach_the_gateway() {
        let gateway = gateway();
        let mut sender = gateway.connect();

        dispatch_text(
            &gateway,
            sender.id(),
            Utf8Bytes::from_static(r#"{"type":"join-ride","data":{"rideId":"4","userId":"a","role":"organizer"}}"#),
        )
        .await;

        assert!(sender.drain().is_empty());
        assert_eq!(gateway.store().participant_count(RideId::new(4)).unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_events_are_reported_back() {
        let gateway = gateway();
        let mut sender = gateway.connect();

        dispatch_text(
            &gateway,
            sender.id(),
            Utf8Bytes::from_static(r#"{"type":"location-update","data":{"rideId":1,"userId":"a","lat":1.0,"lng":2.0}}"#),
        )
        .await;

        assert_eq!(
            sender.drain(),
            vec![ServerMessage::error("Join a ride before sending location updates")]
        );
    }

    #[tokio::test]
    async fn binary_frames_get_an_error_reply() {
        let gateway = gateway();
        let mut sender = gateway.connect();
        let mut other = gateway.connect();

        reject_binary(&gateway, &sender.id());

        let replies = sender.drain();
        assert_eq!(replies.len(), 1);
        assert!(is_error(&replies[0]));
        assert!(other.drain().is_empty());
    }
}
