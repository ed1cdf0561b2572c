pub mod connection;
pub mod state;

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub use connection::Connection;
pub use state::{ConnectionState, Event};

use super::{
    ConnectionId, RideId,
    channel::{ChannelRouter, Outbox},
    directory::{OpenRides, RideDirectory},
    error::RideError,
    ingest::LocationIngest,
    message::{ClientMessage, LocationReport, ServerMessage},
    presence::{PresenceStore, Role, Upserted},
};

#[derive(Debug)]
struct ConnectionEntry {
    state: ConnectionState,
    outbox: Outbox,
}

/// Per-connection lifecycle on top of the presence store and channel router.
///
/// Each connection moves `Unbound -> Bound(ride, user) -> Closed`. Peer
/// notifications sent from here (`user-joined`, `user-left`) are best-effort;
/// the periodic snapshot is what clients must trust.
#[derive(Debug)]
pub struct SessionGateway<D: RideDirectory = OpenRides> {
    store: Arc<PresenceStore>,
    router: Arc<ChannelRouter>,
    directory: Arc<D>,
    ingest: LocationIngest<D>,
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    capacity: usize,
}

impl<D: RideDirectory> SessionGateway<D> {
    pub fn new(
        store: Arc<PresenceStore>,
        router: Arc<ChannelRouter>,
        directory: Arc<D>,
        capacity: usize,
    ) -> Self {
        let ingest = LocationIngest::new(Arc::clone(&store), Arc::clone(&directory));
        Self {
            store,
            router,
            directory,
            ingest,
            connections: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn store(&self) -> &Arc<PresenceStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    /// Accepts a new transport connection in the `Unbound` state.
    pub fn connect(&self) -> Connection {
        let id = Uuid::new_v4();
        let (outbox, receiver) = mpsc::channel(self.capacity);
        self.write_connections().insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Unbound,
                outbox,
            },
        );
        tracing::debug!(connection_id = %id, "Connection accepted");
        Connection::new(id, receiver)
    }

    /// Current state of a connection. Forgotten connections read as `Closed`.
    pub fn connection_state(&self, connection_id: &ConnectionId) -> ConnectionState {
        self.read_connections()
            .get(connection_id)
            .map_or(ConnectionState::Closed, |entry| entry.state.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.read_connections().len()
    }

    pub async fn handle_client_message(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), RideError> {
        match message {
            ClientMessage::JoinRide {
                ride_id,
                user_id,
                role,
            } => {
                let (Some(ride_id), Some(user_id)) = (ride_id, user_id) else {
                    return Err(RideError::InvalidJoin);
                };
                self.join(connection_id, ride_id, &user_id, role).await
            }
            ClientMessage::LocationUpdate(report) => self.report(connection_id, report).await,
            ClientMessage::EndRide { ride_id } => {
                let ride_id = ride_id.ok_or(RideError::InvalidRideId)?;
                tracing::info!(%connection_id, %ride_id, "End of ride requested");
                self.end_ride(ride_id).await;
                Ok(())
            }
        }
    }

    /// Binds an `Unbound` connection to a ride: registers (or touches) the
    /// user's presence, subscribes the connection to the ride's channel and
    /// tells the other subscribers.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        ride_id: RideId,
        user_id: &str,
        role: Option<Role>,
    ) -> Result<(), RideError> {
        if user_id.trim().is_empty() {
            return Err(RideError::InvalidJoin);
        }
        self.expect_unbound(&connection_id)?;
        if !self.directory.is_active(ride_id).await {
            return Err(RideError::RideNotActive(ride_id));
        }

        let outbox = self.transition(&connection_id, |state| {
            expect_unbound_state(state)?;
            Ok(Event::Join {
                ride_id,
                user_id: user_id.to_string(),
            })
        })?;

        let upserted = match self.store.upsert(ride_id, user_id, role) {
            Ok(upserted) => upserted,
            Err(e) => {
                if let Some(entry) = self.write_connections().get_mut(&connection_id) {
                    entry.state = ConnectionState::Unbound;
                }
                return Err(e.into());
            }
        };
        self.router.subscribe(ride_id, connection_id, outbox);

        // The ride may have ended while the first check was pending. Once
        // subscribed, a later end_ride reaches this connection, so checking
        // again here closes the gap.
        if !self.directory.is_active(ride_id).await {
            self.abandon_join(&connection_id, ride_id, user_id);
            return Err(RideError::RideNotActive(ride_id));
        }

        let notified =
            self.router
                .publish_except(ride_id, &ServerMessage::user_joined(user_id), &connection_id);

        tracing::info!(
            %connection_id,
            %ride_id,
            %user_id,
            role = ?upserted.record.role(),
            created = upserted.created,
            notified,
            "User joined ride"
        );
        Ok(())
    }

    /// Applies a location update sent on a bound connection.
    pub async fn report(
        &self,
        connection_id: ConnectionId,
        report: LocationReport,
    ) -> Result<(), RideError> {
        let (ride_id, user_id) = {
            let connections = self.read_connections();
            let entry = connections
                .get(&connection_id)
                .ok_or(RideError::UnknownConnection(connection_id))?;
            let (ride_id, user_id) = entry.state.binding().ok_or(RideError::NotJoined)?;
            (ride_id, user_id.clone())
        };

        let other_ride = report.ride_id.is_some_and(|reported| reported != ride_id);
        let other_user = report
            .user_id
            .as_deref()
            .is_some_and(|reported| reported != user_id);
        if other_ride || other_user {
            return Err(RideError::BindingMismatch);
        }

        self.ingest.report(report).await?;
        Ok(())
    }

    /// Closes a connection. Idempotent; only a bound connection affects the ride.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let Some(entry) = self.write_connections().remove(connection_id) else {
            return;
        };
        let Some((ride_id, user_id)) = entry.state.binding() else {
            tracing::debug!(%connection_id, state = ?entry.state, "Connection closed without ride");
            return;
        };

        self.router.unsubscribe(ride_id, connection_id);
        if let Err(e) = self.store.remove(ride_id, user_id) {
            tracing::warn!(%connection_id, %ride_id, %user_id, error = %e, "Failed to remove presence");
        }
        let notified = self.router.publish(ride_id, &ServerMessage::user_left(user_id.as_str()));
        tracing::info!(%connection_id, %ride_id, %user_id, notified, "User left ride");
    }

    /// Ends a ride for everyone: sends `ride-ended` to all subscribers,
    /// unsubscribes them, clears the ride's presence and closes every
    /// connection bound to it. Returns how many subscribers were notified.
    pub async fn end_ride(&self, ride_id: RideId) -> usize {
        // Retire the ride first so that racing reports cannot re-register users.
        self.directory.ride_ended(ride_id).await;

        let notified = self.router.publish(ride_id, &ServerMessage::ride_ended(ride_id));
        let unsubscribed = self.router.unsubscribe_all(ride_id);
        let cleared = self.store.clear_ride(ride_id).unwrap_or_else(|e| {
            tracing::warn!(%ride_id, error = %e, "Failed to clear ride presence");
            0
        });

        let mut closed = 0;
        for entry in self.write_connections().values_mut() {
            if entry.state.is_bound_to(ride_id) {
                let state = std::mem::replace(&mut entry.state, ConnectionState::Closed);
                entry.state = state.on_event(Event::RideEnded(ride_id));
                closed += 1;
            }
        }

        tracing::info!(
            %ride_id,
            notified,
            unsubscribed = unsubscribed.len(),
            cleared,
            closed,
            "Ride ended"
        );
        notified
    }

    /// Registers a participant whose role was resolved outside the transport,
    /// e.g. by the PIN check that admitted them.
    pub async fn register_participant(
        &self,
        ride_id: RideId,
        user_id: &str,
        role: Option<Role>,
    ) -> Result<Upserted, RideError> {
        if user_id.trim().is_empty() {
            return Err(RideError::InvalidJoin);
        }
        if !self.directory.is_active(ride_id).await {
            return Err(RideError::RideNotActive(ride_id));
        }
        let upserted = self.store.upsert(ride_id, user_id, role)?;
        tracing::info!(%ride_id, %user_id, role = ?upserted.record.role(), created = upserted.created, "Participant registered");
        Ok(upserted)
    }

    /// Sends a message to one connection only. Returns whether it was queued.
    pub fn send(&self, connection_id: &ConnectionId, message: ServerMessage) -> bool {
        let connections = self.read_connections();
        let Some(entry) = connections.get(connection_id) else {
            return false;
        };
        match entry.outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%connection_id, "Connection queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Reports an error to the connection that caused it.
    pub fn send_error(&self, connection_id: &ConnectionId, error: &RideError) -> bool {
        self.send(connection_id, ServerMessage::error(error.to_string()))
    }

    /// Reverts a join whose ride ended before it completed.
    fn abandon_join(&self, connection_id: &ConnectionId, ride_id: RideId, user_id: &str) {
        self.router.unsubscribe(ride_id, connection_id);
        if let Err(e) = self.store.remove(ride_id, user_id) {
            tracing::warn!(%connection_id, %ride_id, %user_id, error = %e, "Failed to remove presence");
        }
        if let Some(entry) = self.write_connections().get_mut(connection_id) {
            let state = std::mem::replace(&mut entry.state, ConnectionState::Closed);
            entry.state = state.on_event(Event::RideEnded(ride_id));
        }
        tracing::info!(%connection_id, %ride_id, %user_id, "Join abandoned, ride ended meanwhile");
    }

    fn expect_unbound(&self, connection_id: &ConnectionId) -> Result<(), RideError> {
        let connections = self.read_connections();
        let entry = connections
            .get(connection_id)
            .ok_or(RideError::UnknownConnection(*connection_id))?;
        expect_unbound_state(&entry.state)
    }

    /// Applies the event chosen by `decide` to a connection's state and
    /// returns the connection's outbox.
    fn transition(
        &self,
        connection_id: &ConnectionId,
        decide: impl FnOnce(&ConnectionState) -> Result<Event, RideError>,
    ) -> Result<Outbox, RideError> {
        let mut connections = self.write_connections();
        let entry = connections
            .get_mut(connection_id)
            .ok_or(RideError::UnknownConnection(*connection_id))?;
        let event = decide(&entry.state)?;
        let state = std::mem::replace(&mut entry.state, ConnectionState::Closed);
        entry.state = state.on_event(event);
        Ok(entry.outbox.clone())
    }

    fn read_connections(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_connections(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn expect_unbound_state(state: &ConnectionState) -> Result<(), RideError> {
    match state {
        ConnectionState::Unbound => Ok(()),
        ConnectionState::Bound { ride_id, .. } => Err(RideError::AlreadyJoined(*ride_id)),
        ConnectionState::Closed => Err(RideError::ConnectionClosed),
    }
}
