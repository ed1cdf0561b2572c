use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{sync::watch, task::JoinHandle};

use super::{presence::PresenceStore, ticker::run_every};

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Evicts presence records that have not been seen for longer than the
/// staleness threshold. This is the only cleanup path for users whose
/// socket vanished without a clean disconnect.
#[derive(Debug, Clone)]
pub struct StalenessReaper {
    store: Arc<PresenceStore>,
    interval: Duration,
    threshold: TimeDelta,
}

impl StalenessReaper {
    pub fn new(store: Arc<PresenceStore>, interval: Duration, stale_after: Duration) -> Self {
        Self {
            store,
            interval,
            threshold: TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Evicts everything last seen before `now - threshold`. Returns the
    /// number of records removed.
    pub fn tick_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.checked_sub_signed(self.threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store.reap_stale_before(cutoff) {
            Ok(0) => 0,
            Ok(reaped) => {
                tracing::info!(reaped, %cutoff, "Evicted stale presence records");
                reaped
            }
            Err(e) => {
                tracing::error!(error = %e, "Stale presence sweep failed");
                0
            }
        }
    }

    pub fn tick(&self) -> usize {
        self.tick_at(Utc::now())
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_every("staleness-reaper", self.interval, shutdown, || {
            self.tick();
        })
        .await;
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::{RideId, presence::Position};

    const RIDE: RideId = RideId::new(7);

    fn reaper(store: &Arc<PresenceStore>) -> StalenessReaper {
        StalenessReaper::new(Arc::clone(store), DEFAULT_REAP_INTERVAL, DEFAULT_STALE_AFTER)
    }

    #[test]
    fn fresh_records_survive() {
        let store = Arc::new(PresenceStore::new());
        store.upsert(RIDE, "a", None).unwrap();

        assert_eq!(reaper(&store).tick(), 0);
        assert_eq!(store.participant_count(RIDE).unwrap(), 1);
    }

    #[test]
    fn records_past_the_threshold_are_evicted() {
        let store = Arc::new(PresenceStore::new());
        store.upsert(RIDE, "a", None).unwrap();
        store.upsert(RideId::new(8), "b", None).unwrap();

        let later = Utc::now() + TimeDelta::seconds(121);
        assert_eq!(reaper(&store).tick_at(later), 2);
        assert!(store.list_non_empty_rides().unwrap().is_empty());
    }

    #[test]
    fn a_location_update_keeps_a_record_alive() {
        let store = Arc::new(PresenceStore::new());
        store.upsert(RIDE, "a", None).unwrap();
        let reaper = reaper(&store);
        let probe = Utc::now() + TimeDelta::seconds(119);

        assert_eq!(reaper.tick_at(probe), 0);
        store
            .update_location(RIDE, "a", Position::new(1.0, 2.0), None)
            .unwrap();
        assert_eq!(reaper.tick_at(probe + TimeDelta::seconds(1)), 0);
        assert!(store.get(RIDE, "a").unwrap().is_some());
    }

    #[test]
    fn oversized_threshold_never_overflows() {
        let store = Arc::new(PresenceStore::new());
        store.upsert(RIDE, "a", None).unwrap();
        let reaper = StalenessReaper::new(Arc::clone(&store), DEFAULT_REAP_INTERVAL, Duration::MAX);

        assert_eq!(reaper.tick(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_shutdown_sender_is_dropped() {
        let store = Arc::new(PresenceStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = reaper(&store).spawn(shutdown_rx);

        tokio::time::sleep(DEFAULT_REAP_INTERVAL * 3).await;
        drop(shutdown_tx);
        handle.await.unwrap();
    }
}
