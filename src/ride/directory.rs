use std::{collections::HashSet, future::Future};

use tokio::sync::RwLock;

use super::RideId;

/// Ride-lifecycle collaborator consulted before presence is registered.
///
/// Rides are created and retired outside this crate; the presence engine only
/// needs to know whether a ride still accepts participants.
pub trait RideDirectory: Send + Sync + 'static {
    fn is_active(&self, ride_id: RideId) -> impl Future<Output = bool> + Send;

    /// Called once a ride has been ended through the session gateway.
    fn ride_ended(&self, ride_id: RideId) -> impl Future<Output = ()> + Send;
}

/// Treats every ride as active until it is ended. Ride ids are never reused,
/// so an ended ride stays closed for the life of the process.
#[derive(Debug, Default)]
pub struct OpenRides {
    ended: RwLock<HashSet<RideId>>,
}

impl OpenRides {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RideDirectory for OpenRides {
    async fn is_active(&self, ride_id: RideId) -> bool {
        !self.ended.read().await.contains(&ride_id)
    }

    async fn ride_ended(&self, ride_id: RideId) {
        self.ended.write().await.insert(ride_id);
    }
}
