use crate::{
    api,
    config::Config,
    ride::{
        ChannelRouter, OpenRides, PresenceStore, SessionGateway, SnapshotBroadcaster,
        StalenessReaper,
    },
    ws::ws_handler,
};
use axum::{
    Router,
    http::{HeaderName, Method},
    routing::{delete, get, post},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub type Gateway = SessionGateway<OpenRides>;

/// Transport settings shared by every WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let gateway = SessionGateway::new(
            Arc::new(PresenceStore::new()),
            Arc::new(ChannelRouter::new()),
            Arc::new(OpenRides::new()),
            config.channel_capacity,
        );
        Self {
            gateway: Arc::new(gateway),
            heartbeat: Heartbeat {
                interval: config.heartbeat_interval(),
                timeout: config.heartbeat_timeout(),
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        // WebSocket upgrades need the handshake headers
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("upgrade"),
            HeaderName::from_static("connection"),
            HeaderName::from_static("sec-websocket-key"),
            HeaderName::from_static("sec-websocket-version"),
            HeaderName::from_static("sec-websocket-extensions"),
            HeaderName::from_static("sec-websocket-protocol"),
        ])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(ws_handler))
        .route("/api/rides", get(api::rides::list_rides))
        .route("/api/rides/{ride_id}", delete(api::rides::end_ride))
        .route(
            "/api/rides/{ride_id}/participants",
            post(api::rides::register_participant),
        )
        .route(
            "/api/rides/{ride_id}/presence",
            get(api::presence::get_presence),
        )
        .layer(cors)
        .with_state(state)
}

pub struct App {
    config: Config,
    state: AppState,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Builds the shared state and starts the snapshot broadcaster and the
    /// staleness reaper.
    pub fn new(config: Config) -> Self {
        let state = AppState::new(&config);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let gateway = &state.gateway;

        let broadcaster = SnapshotBroadcaster::new(
            Arc::clone(gateway.store()),
            Arc::clone(gateway.router()),
            config.snapshot_interval(),
        );
        let reaper = StalenessReaper::new(
            Arc::clone(gateway.store()),
            config.reap_interval(),
            config.stale_after(),
        );
        let tasks = vec![
            broadcaster.spawn(shutdown_rx.clone()),
            reaper.spawn(shutdown_rx),
        ];

        Self {
            config,
            state,
            shutdown,
            tasks,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = router(self.state.clone());
        let addr = self.config.address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("Server running on http://{}", addr);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        match &served {
            Ok(()) => info!("Server shut down gracefully"),
            Err(e) => error!("Server error: {}", e),
        }

        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
