use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{RideId, UserId, presence::{Role, Snapshot}};

/// Payload of a `location-update` event.
///
/// Every field is optional on the wire so that a missing value surfaces as a
/// validation error for the sender instead of an unparsable frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LocationReport {
    #[ts(type = "number | string | null")]
    pub ride_id: Option<RideId>,
    pub user_id: Option<UserId>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub role: Option<Role>,
}

impl LocationReport {
    pub fn new(ride_id: RideId, user_id: impl Into<UserId>, lat: f64, lng: f64) -> Self {
        Self {
            ride_id: Some(ride_id),
            user_id: Some(user_id.into()),
            lat: Some(lat),
            lng: Some(lng),
            role: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
#[ts(export)]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinRide {
        #[ts(type = "number | string | null")]
        ride_id: Option<RideId>,
        user_id: Option<UserId>,
        role: Option<Role>,
    },
    LocationUpdate(LocationReport),
    #[serde(rename_all = "camelCase")]
    EndRide {
        #[ts(type = "number | string | null")]
        ride_id: Option<RideId>,
    },
}

impl TryFrom<Utf8Bytes> for ClientMessage {
    type Error = serde_json::Error;
    fn try_from(bytes: Utf8Bytes) -> Result<Self, Self::Error> {
        serde_json::from_str(bytes.as_str())
    }
}

/// Events sent to clients.
///
/// Only `UserSnapshot` is authoritative: each one fully replaces whatever the
/// client held before. `UserJoined` and `UserLeft` are best-effort hints and
/// may be lost or arrive out of order relative to snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
#[ts(export)]
pub enum ServerMessage {
    UserSnapshot(Snapshot),
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: UserId,
        #[ts(type = "number")]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: UserId,
        #[ts(type = "number")]
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    RideEnded {
        #[ts(type = "number")]
        ride_id: RideId,
        #[ts(type = "number")]
        timestamp: i64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn user_joined(user_id: impl Into<UserId>) -> Self {
        ServerMessage::UserJoined {
            user_id: user_id.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn user_left(user_id: impl Into<UserId>) -> Self {
        ServerMessage::UserLeft {
            user_id: user_id.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn ride_ended(ride_id: RideId) -> Self {
        ServerMessage::RideEnded {
            ride_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl TryFrom<&ServerMessage> for Utf8Bytes {
    type Error = serde_json::Error;
    fn try_from(message: &ServerMessage) -> Result<Self, Self::Error> {
        serde_json::to_string(message).map(Utf8Bytes::from)
    }
}
