use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use ride_presence::{
    config::Config,
    ride::{
        RideId, Role,
        message::{ClientMessage, LocationReport},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    signal::ctrl_c,
    sync::{Mutex, watch},
    time::Instant,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use url::Url;

type WsWriter = Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const USAGE: &str = "usage: client <ride_id> [user_id] [organizer|rider]";

/// Who this client joins as.
#[derive(Debug, Clone)]
struct Identity {
    ride_id: RideId,
    user_id: String,
    role: Option<Role>,
}

fn parse_args() -> Result<Identity, String> {
    let mut args = std::env::args().skip(1);
    let ride_id = args
        .next()
        .ok_or_else(|| USAGE.to_string())?
        .parse::<RideId>()
        .map_err(|e| format!("invalid ride id: {e}\n{USAGE}"))?;
    let user_id = args
        .next()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let role = match args.next().as_deref() {
        None => None,
        Some("organizer") => Some(Role::Organizer),
        Some("rider") => Some(Role::Rider),
        Some(other) => return Err(format!("invalid role '{other}'\n{USAGE}")),
    };
    Ok(Identity {
        ride_id,
        user_id,
        role,
    })
}

/// Parses a stdin line of the form `lat,lng`.
fn parse_position(line: &str) -> Option<(f64, f64)> {
    let (lat, lng) = line.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

fn encode(message: &ClientMessage) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(message)?.into()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let identity = parse_args()?;
    let config = Config::from_env()?;
    let url = Url::parse(&format!("ws://{}/ws", config.address()))?;
    let ride_id = identity.ride_id;
    let user_id = identity.user_id.clone();
    tracing::info!(%ride_id, %user_id, "Connecting to {}", url);

    let (ws_stream, response) = connect_async(url.as_str())
        .await
        .map_err(|e| format!("Failed to connect: {}", e))?;
    tracing::info!(%ride_id, %user_id, "Connected successfully!");
    tracing::debug!(%ride_id, %user_id, "Server response: {:?}", response);

    let (mut write, read) = ws_stream.split();
    write
        .send(encode(&ClientMessage::JoinRide {
            ride_id: Some(ride_id),
            user_id: Some(user_id.clone()),
            role: identity.role,
        })?)
        .await?;
    let writer: WsWriter = Arc::new(Mutex::new(write));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let last_pong_received = Arc::new(Mutex::new(Instant::now()));

    let heartbeat_handle = tokio::spawn(heartbeat_task(
        writer.clone(),
        last_pong_received.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        shutdown_rx.clone(),
        shutdown_tx.clone(),
    ));
    let sender_handle = tokio::spawn(sender_task(
        writer.clone(),
        identity,
        shutdown_rx.clone(),
        shutdown_tx.clone(),
    ));
    let receiver_handle = tokio::spawn(receiver_task(
        read,
        last_pong_received,
        shutdown_rx.clone(),
        shutdown_tx.clone(),
    ));

    let shutdown_tx_ctrlc = shutdown_tx.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        if let Err(e) = ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Ctrl+C received, initiating graceful shutdown...");
        let _ = shutdown_tx_ctrlc.send(true);
    });

    let mut shutdown_rx_main = shutdown_rx.clone();
    tokio::select! {
        result = heartbeat_handle => tracing::info!("Heartbeat task finished: {:?}", result),
        result = sender_handle => tracing::info!("Sender task finished: {:?}", result),
        result = receiver_handle => tracing::info!("Receiver task finished: {:?}", result),
        result = ctrl_c_handle => tracing::info!("Ctrl+C handler finished: {:?}", result),
        _ = shutdown_rx_main.changed() => {
            if *shutdown_rx_main.borrow() {
                tracing::info!("Shutdown signal received in main, initiating termination.");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    // Give tasks a moment to observe the shutdown signal
    tokio::time::sleep(Duration::from_millis(100)).await;

    match writer.try_lock() {
        Ok(mut writer_locked) => {
            if let Err(e) = writer_locked.close().await {
                tracing::warn!("Error closing WebSocket writer: {}", e);
            }
        }
        Err(e) => tracing::warn!("Could not acquire writer lock for closing: {}", e),
    }

    tracing::info!(%ride_id, %user_id, "Client exiting.");
    Ok(())
}

async fn heartbeat_task(
    writer: WsWriter,
    last_pong_received: Arc<Mutex<Instant>>,
    interval: Duration,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    let mut interval = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if last_pong_received.lock().await.elapsed() > timeout {
                    tracing::warn!("No Pong received from server recently. Assuming connection lost.");
                    let _ = shutdown_tx.send(true);
                    break;
                }

                tracing::debug!("Client sending heartbeat Ping");
                if let Err(e) = writer.lock().await.send(Message::Ping(Vec::new().into())).await {
                    tracing::warn!("Client failed to send Ping: {}. Assuming connection lost.", e);
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Heartbeat task exiting.");
}

/// Turns every `lat,lng` line on stdin into a `location-update`.
async fn sender_task(
    writer: WsWriter,
    identity: Identity,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            result = stdin.next_line() => {
                match result {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let Some((lat, lng)) = parse_position(line) else {
                            eprintln!("expected 'lat,lng', got '{line}'");
                            continue;
                        };
                        let mut report =
                            LocationReport::new(identity.ride_id, identity.user_id.clone(), lat, lng);
                        report.role = identity.role;
                        let message = match encode(&ClientMessage::LocationUpdate(report)) {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::error!("Failed to encode location update: {}", e);
                                continue;
                            }
                        };
                        tracing::debug!(lat, lng, "Sending location update");
                        if let Err(e) = writer.lock().await.send(message).await {
                            tracing::error!("Failed to send message: {}", e);
                            let _ = shutdown_tx.send(true);
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Stdin closed.");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading from stdin: {}", e);
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Sender task exiting.");
}

async fn receiver_task(
    mut reader: WsReader,
    last_pong_received: Arc<Mutex<Instant>>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            message_result = reader.next() => {
                match message_result {
                    Some(Ok(Message::Text(text))) => println!("{}", text),
                    Some(Ok(Message::Pong(_))) => {
                        *last_pong_received.lock().await = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Received Close frame: {:?}", frame);
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("Error receiving message: {}", e);
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream closed by peer.");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Receiver task exiting.");
}
