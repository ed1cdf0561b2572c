use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::{ConnectionId, RideId};
use crate::api::ErrorResponse;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Rejections of a single location report.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Missing ride ID")]
    MissingRideId,
    #[error("Missing user ID")]
    MissingUserId,
    #[error("Both lat and lng are required")]
    MissingCoordinate,
    #[error("Coordinates must be finite numbers")]
    NonFiniteCoordinate,
    #[error("Latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Ride '{0}' is not active")]
    RideNotActive(RideId),
    #[error("User '{user_id}' is not registered in ride '{ride_id}'")]
    Unregistered { ride_id: RideId, user_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            IngestError::RideNotActive(_) | IngestError::Unregistered { .. } | IngestError::Store(_)
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RideError {
    #[error("Invalid ride ID or user ID")]
    InvalidJoin,
    #[error("Invalid ride ID")]
    InvalidRideId,
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Connection '{0}' is not known")]
    UnknownConnection(ConnectionId),
    #[error("Connection is already in ride '{0}'")]
    AlreadyJoined(RideId),
    #[error("Connection has been closed")]
    ConnectionClosed,
    #[error("Join a ride before sending location updates")]
    NotJoined,
    #[error("Location update does not match the joined ride and user")]
    BindingMismatch,
    #[error("Ride '{0}' is not active")]
    RideNotActive(RideId),
    #[error("Ride '{0}' has no participants")]
    RideNotFound(RideId),
    #[error("Failed to update location: {0}")]
    Ingest(#[from] IngestError),
    #[error("Presence store error: {0}")]
    Store(#[from] StoreError),
}

impl RideError {
    pub fn kind(&self) -> &'static str {
        match self {
            RideError::InvalidJoin | RideError::InvalidRideId | RideError::InvalidMessage(_) => {
                "InvalidRequest"
            }
            RideError::UnknownConnection(_) => "UnknownConnection",
            RideError::AlreadyJoined(_) => "AlreadyJoined",
            RideError::ConnectionClosed => "ConnectionClosed",
            RideError::NotJoined => "NotJoined",
            RideError::BindingMismatch => "BindingMismatch",
            RideError::RideNotActive(_) => "RideNotActive",
            RideError::RideNotFound(_) => "RideNotFound",
            RideError::Ingest(e) if e.is_validation() => "InvalidLocation",
            RideError::Ingest(IngestError::RideNotActive(_)) => "RideNotActive",
            RideError::Ingest(IngestError::Unregistered { .. }) => "NotJoined",
            RideError::Ingest(_) | RideError::Store(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RideError::InvalidJoin
            | RideError::InvalidRideId
            | RideError::InvalidMessage(_)
            | RideError::BindingMismatch => StatusCode::BAD_REQUEST,
            RideError::Ingest(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            RideError::UnknownConnection(_) | RideError::RideNotFound(_) => StatusCode::NOT_FOUND,
            RideError::AlreadyJoined(_) | RideError::ConnectionClosed | RideError::NotJoined => {
                StatusCode::CONFLICT
            }
            RideError::RideNotActive(_) | RideError::Ingest(IngestError::RideNotActive(_)) => {
                StatusCode::GONE
            }
            RideError::Ingest(IngestError::Unregistered { .. }) => StatusCode::CONFLICT,
            RideError::Ingest(_) | RideError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RideError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::new(self.kind(), &self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = RideError::from(IngestError::NonFiniteCoordinate);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "InvalidLocation");
    }

    #[test]
    fn ended_rides_map_to_gone() {
        let ride_id = RideId::new(3);
        assert_eq!(RideError::RideNotActive(ride_id).status(), StatusCode::GONE);
        assert_eq!(
            RideError::from(IngestError::RideNotActive(ride_id)).status(),
            StatusCode::GONE
        );
    }

    #[test]
    fn empty_rides_map_to_not_found() {
        let err = RideError::RideNotFound(RideId::new(9));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "RideNotFound");
        assert_eq!(err.to_string(), "Ride '9' has no participants");
    }

    #[test]
    fn store_failures_are_internal() {
        let err = RideError::from(StoreError::LockPoisoned("ride 1".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Presence store error: Internal lock poisoned: ride 1");
    }
}
