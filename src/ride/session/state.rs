use crate::ride::{RideId, UserId};

// --- FSM Types ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unbound,
    Bound { ride_id: RideId, user_id: UserId },
    Closed,
}

#[derive(Debug, Clone)]
pub enum Event {
    Join { ride_id: RideId, user_id: UserId },
    Disconnect,
    RideEnded(RideId),
}

// --- FSM Implementation ---

impl ConnectionState {
    pub fn on_event(self, event: Event) -> ConnectionState {
        match (self, event) {
            (ConnectionState::Unbound, Event::Join { ride_id, user_id }) => {
                ConnectionState::Bound { ride_id, user_id }
            }
            (ConnectionState::Unbound, Event::Disconnect) => ConnectionState::Closed,

            (ConnectionState::Bound { .. }, Event::Disconnect) => ConnectionState::Closed,
            (ConnectionState::Bound { ride_id, .. }, Event::RideEnded(ended)) if ride_id == ended => {
                ConnectionState::Closed
            }

            // Default: remain in current state
            (state, _) => state,
        }
    }

    pub fn binding(&self) -> Option<(RideId, &UserId)> {
        match self {
            ConnectionState::Bound { ride_id, user_id } => Some((*ride_id, user_id)),
            _ => None,
        }
    }

    pub fn is_bound_to(&self, ride: RideId) -> bool {
        matches!(self, ConnectionState::Bound { ride_id, .. } if *ride_id == ride)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}
