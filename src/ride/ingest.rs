use std::sync::Arc;

use super::{
    RideId, UserId,
    directory::{OpenRides, RideDirectory},
    error::IngestError,
    message::LocationReport,
    presence::{PresenceStore, Position, Role},
};

/// A location report that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReport {
    pub ride_id: RideId,
    pub user_id: UserId,
    pub position: Position,
    pub role: Option<Role>,
}

impl TryFrom<LocationReport> for ValidReport {
    type Error = IngestError;

    fn try_from(report: LocationReport) -> Result<Self, Self::Error> {
        let ride_id = report.ride_id.ok_or(IngestError::MissingRideId)?;
        let user_id = report
            .user_id
            .filter(|user_id| !user_id.trim().is_empty())
            .ok_or(IngestError::MissingUserId)?;
        let (Some(lat), Some(lng)) = (report.lat, report.lng) else {
            return Err(IngestError::MissingCoordinate);
        };
        if !lat.is_finite() || !lng.is_finite() {
            return Err(IngestError::NonFiniteCoordinate);
        }
        if lat.abs() > 90.0 {
            return Err(IngestError::LatitudeOutOfRange(lat));
        }
        if lng.abs() > 180.0 {
            return Err(IngestError::LongitudeOutOfRange(lng));
        }

        Ok(ValidReport {
            ride_id,
            user_id,
            position: Position::new(lat, lng),
            role: report.role,
        })
    }
}

/// Validates location reports and writes them into the presence store.
///
/// Nothing is broadcast from here; the next snapshot tick carries the new
/// position, so fan-out volume depends on the tick rate and not on how often
/// clients report.
#[derive(Debug)]
pub struct LocationIngest<D: RideDirectory = OpenRides> {
    store: Arc<PresenceStore>,
    directory: Arc<D>,
}

impl<D: RideDirectory> LocationIngest<D> {
    pub fn new(store: Arc<PresenceStore>, directory: Arc<D>) -> Self {
        Self { store, directory }
    }

    /// Applies a report. A user not yet registered in an active ride is
    /// registered first (as a rider unless the report names a role), since a
    /// report may race ahead of the join that announces it.
    pub async fn report(&self, report: LocationReport) -> Result<(), IngestError> {
        let ValidReport {
            ride_id,
            user_id,
            position,
            role,
        } = ValidReport::try_from(report)?;

        if self.store.update_location(ride_id, &user_id, position, role)? {
            tracing::debug!(%ride_id, %user_id, lat = position.lat, lng = position.lng, "Updated location");
            return Ok(());
        }

        if !self.directory.is_active(ride_id).await {
            return Err(IngestError::RideNotActive(ride_id));
        }

        let upserted = self.store.upsert(ride_id, &user_id, Some(role.unwrap_or(Role::Rider)))?;
        if upserted.created {
            tracing::info!(%ride_id, %user_id, role = ?upserted.record.role(), "Registered user from location report");
        }
        if !self.store.update_location(ride_id, &user_id, position, None)? {
            // The ride was cleared between registration and the update.
            return Err(IngestError::Unregistered { ride_id, user_id });
        }
        tracing::debug!(%ride_id, %user_id, lat = position.lat, lng = position.lng, "Updated location");
        Ok(())
    }
}
