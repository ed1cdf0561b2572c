use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{ConnectionId, RideId, message::ServerMessage};

/// Sending half of one connection's outbound queue.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Connections subscribed to a single ride.
#[derive(Debug, Default)]
struct Channel {
    subscribers: HashMap<ConnectionId, Outbox>,
}

impl Channel {
    /// Best-effort fan-out. Never blocks: a full or closed outbox only costs
    /// that subscriber its copy.
    fn deliver(
        &self,
        ride_id: RideId,
        message: &ServerMessage,
        except: Option<&ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for (connection_id, outbox) in &self.subscribers {
            if except == Some(connection_id) {
                continue;
            }
            match outbox.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%ride_id, %connection_id, "Subscriber queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(%ride_id, %connection_id, "Subscriber connection is gone, dropping message");
                }
            }
        }
        delivered
    }
}

/// Publish/subscribe substrate: one channel per ride.
///
/// Channels are created on first subscribe and dropped when their last
/// subscriber leaves. Subscriber maps hold no cross-entry invariants, so a
/// poisoned lock is recovered rather than reported.
#[derive(Debug, Default)]
pub struct ChannelRouter {
    channels: RwLock<HashMap<RideId, Channel>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the connection was not yet subscribed.
    pub fn subscribe(&self, ride_id: RideId, connection_id: ConnectionId, outbox: Outbox) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(ride_id)
            .or_default()
            .subscribers
            .insert(connection_id, outbox)
            .is_none()
    }

    pub fn unsubscribe(&self, ride_id: RideId, connection_id: &ConnectionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(channel) = channels.get_mut(&ride_id) else {
            return false;
        };
        let removed = channel.subscribers.remove(connection_id).is_some();
        if channel.subscribers.is_empty() {
            channels.remove(&ride_id);
        }
        removed
    }

    /// Removes every subscriber of a ride, returning who was subscribed.
    pub fn unsubscribe_all(&self, ride_id: RideId) -> Vec<ConnectionId> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .remove(&ride_id)
            .map(|channel| channel.subscribers.into_keys().collect())
            .unwrap_or_default()
    }

    /// Sends `message` to every current subscriber of the ride. Returns how
    /// many subscribers accepted it; a ride without subscribers yields 0.
    pub fn publish(&self, ride_id: RideId, message: &ServerMessage) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&ride_id)
            .map_or(0, |channel| channel.deliver(ride_id, message, None))
    }

    /// Like [`publish`](Self::publish) but skips one connection, typically the
    /// one whose action triggered the event.
    pub fn publish_except(
        &self,
        ride_id: RideId,
        message: &ServerMessage,
        except: &ConnectionId,
    ) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&ride_id)
            .map_or(0, |channel| channel.deliver(ride_id, message, Some(except)))
    }

    pub fn subscriber_count(&self, ride_id: RideId) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels.get(&ride_id).map_or(0, |channel| channel.subscribers.len())
    }

    pub fn is_subscribed(&self, ride_id: RideId, connection_id: &ConnectionId) -> bool {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&ride_id)
            .is_some_and(|channel| channel.subscribers.contains_key(connection_id))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const RIDE: RideId = RideId::new(1);

    fn subscriber(router: &ChannelRouter, capacity: usize) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4();
        router.subscribe(RIDE, id, tx);
        (id, rx)
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let router = ChannelRouter::new();
        let (_, mut a) = subscriber(&router, 4);
        let (_, mut b) = subscriber(&router, 4);

        let delivered = router.publish(RIDE, &ServerMessage::user_joined("x"));

        assert_eq!(delivered, 2);
        assert!(matches!(a.try_recv(), Ok(ServerMessage::UserJoined { .. })));
        assert!(matches!(b.try_recv(), Ok(ServerMessage::UserJoined { .. })));
    }

    #[test]
    fn publish_except_skips_the_origin() {
        let router = ChannelRouter::new();
        let (origin, mut a) = subscriber(&router, 4);
        let (_, mut b) = subscriber(&router, 4);

        assert_eq!(router.publish_except(RIDE, &ServerMessage::user_joined("x"), &origin), 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn publishing_to_an_empty_channel_is_a_no_op() {
        let router = ChannelRouter::new();
        assert_eq!(router.publish(RIDE, &ServerMessage::error("x")), 0);
        assert_eq!(router.channel_count(), 0);
    }

    #[test]
    fn slow_and_dead_subscribers_do_not_block_others() {
        let router = ChannelRouter::new();
        let (_, _full) = subscriber(&router, 1);
        let (_, dead) = subscriber(&router, 4);
        drop(dead);
        let (_, mut healthy) = subscriber(&router, 4);

        assert_eq!(router.publish(RIDE, &ServerMessage::error("first")), 2);
        assert_eq!(router.publish(RIDE, &ServerMessage::error("second")), 1);

        assert_eq!(healthy.try_recv().unwrap(), ServerMessage::error("first"));
        assert_eq!(healthy.try_recv().unwrap(), ServerMessage::error("second"));
    }

    #[test]
    fn channel_is_dropped_with_its_last_subscriber() {
        let router = ChannelRouter::new();
        let (a, _rx_a) = subscriber(&router, 4);
        let (b, _rx_b) = subscriber(&router, 4);

        assert!(router.unsubscribe(RIDE, &a));
        assert!(!router.unsubscribe(RIDE, &a));
        assert_eq!(router.subscriber_count(RIDE), 1);
        assert!(router.unsubscribe(RIDE, &b));
        assert_eq!(router.channel_count(), 0);
    }

    #[test]
    fn unsubscribe_all_returns_previous_members() {
        let router = ChannelRouter::new();
        let (a, _rx_a) = subscriber(&router, 4);
        let (b, _rx_b) = subscriber(&router, 4);

        let mut removed = router.unsubscribe_all(RIDE);
        removed.sort();
        let mut expected = vec![a, b];
        expected.sort();

        assert_eq!(removed, expected);
        assert!(!router.is_subscribed(RIDE, &a));
        assert!(router.unsubscribe_all(RIDE).is_empty());
    }
}
