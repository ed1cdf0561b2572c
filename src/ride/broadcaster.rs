use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

use super::{
    channel::ChannelRouter, message::ServerMessage, presence::PresenceStore, ticker::run_every,
};

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(2000);

/// Periodically publishes every non-empty ride's snapshot to its channel.
///
/// Each ride is read separately, so rides in one tick may be captured at
/// slightly different instants. A failure on one ride is logged and the tick
/// moves on to the next.
#[derive(Debug, Clone)]
pub struct SnapshotBroadcaster {
    store: Arc<PresenceStore>,
    router: Arc<ChannelRouter>,
    interval: Duration,
}

impl SnapshotBroadcaster {
    pub fn new(store: Arc<PresenceStore>, router: Arc<ChannelRouter>, interval: Duration) -> Self {
        Self {
            store,
            router,
            interval,
        }
    }

    /// Runs a single broadcast pass. Returns how many rides were published.
    pub fn tick(&self) -> usize {
        let rides = match self.store.list_non_empty_rides() {
            Ok(rides) => rides,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list rides for snapshot broadcast");
                return 0;
            }
        };

        let mut published = 0;
        for ride_id in rides {
            let snapshot = match self.store.snapshot(ride_id) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(%ride_id, error = %e, "Failed to read snapshot");
                    continue;
                }
            };
            // The ride may have emptied since it was listed.
            if snapshot.is_empty() {
                continue;
            }

            let users = snapshot.len();
            let delivered = self.router.publish(ride_id, &ServerMessage::UserSnapshot(snapshot));
            tracing::debug!(%ride_id, users, delivered, "Broadcast snapshot");
            published += 1;
        }
        published
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_every("snapshot-broadcaster", self.interval, shutdown, || {
            self.tick();
        })
        .await;
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
