pub mod broadcaster;
pub mod channel;
pub mod directory;
pub mod error;
pub mod ingest;
pub mod message;
pub mod presence;
pub mod reaper;
pub mod session;
mod ticker;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

pub use broadcaster::SnapshotBroadcaster;
pub use channel::ChannelRouter;
pub use directory::{OpenRides, RideDirectory};
pub use error::{IngestError, RideError};
pub use ingest::LocationIngest;
pub use presence::{PresenceRecord, PresenceStore, Position, Role, Snapshot};
pub use reaper::StalenessReaper;
pub use session::SessionGateway;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

pub type UserId = String;
pub type ConnectionId = Uuid;

/// Key of one ride session.
///
/// Rides are numbered by the external ride store. Clients send the id either
/// as a JSON number or as a numeric string, so both forms deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RideId(i64);

impl RideId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RideId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RideId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(RideId)
    }
}

impl Serialize for RideId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for RideId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(RideId(id)),
            Raw::Text(text) => text
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid ride id '{text}'"))),
        }
    }
}
