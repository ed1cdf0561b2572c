use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use ts_rs::TS;

use crate::{
    ride::{RideError, RideId, Snapshot},
    server::AppState,
};

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PresenceResponse {
    #[ts(type = "number")]
    pub ride_id: RideId,
    pub users: Snapshot,
}

/// GET /api/rides/{ride_id}/presence
/// Current snapshot of one ride, the same view the broadcaster publishes.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<PresenceResponse>, RideError> {
    let ride_id: RideId = ride_id.parse().map_err(|_| RideError::InvalidRideId)?;
    let users = state.gateway.store().snapshot(ride_id)?;
    if users.is_empty() {
        return Err(RideError::RideNotFound(ride_id));
    }
    Ok(Json(PresenceResponse { ride_id, users }))
}
