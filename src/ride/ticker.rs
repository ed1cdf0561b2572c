use std::time::Duration;

use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Calls `on_tick` every `period` until `shutdown` flips to `true` or its
/// sender is dropped. The first call happens one full period after start.
/// Periods shorter than a millisecond are raised to one.
pub(crate) async fn run_every(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut on_tick: impl FnMut(),
) {
    let period = period.max(MIN_PERIOD);
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

    loop {
        tokio::select! {
            _ = interval.tick() => on_tick(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!(task = name, "Periodic task stopped");
}
