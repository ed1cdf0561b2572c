use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    ride::{PresenceRecord, RideError, RideId, Role, UserId},
    server::AppState,
};

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RideSummary {
    #[ts(type = "number")]
    pub ride_id: RideId,
    pub participant_count: usize,
    pub subscriber_count: usize,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterParticipantRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ParticipantResponse {
    #[ts(type = "number")]
    pub ride_id: RideId,
    pub user_id: UserId,
    pub created: bool,
    pub presence: PresenceRecord,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RideEndedResponse {
    #[ts(type = "number")]
    pub ride_id: RideId,
    pub notified: usize,
}

fn parse_ride_id(raw: &str) -> Result<RideId, RideError> {
    raw.parse().map_err(|_| RideError::InvalidRideId)
}

/// GET /api/rides
/// Rides that currently have at least one participant
pub async fn list_rides(State(state): State<AppState>) -> Result<Json<Vec<RideSummary>>, RideError> {
    let gateway = &state.gateway;
    let rides = gateway.store().list_non_empty_rides()?;

    let mut summaries = Vec::with_capacity(rides.len());
    for ride_id in rides {
        summaries.push(RideSummary {
            ride_id,
            participant_count: gateway.store().participant_count(ride_id)?,
            subscriber_count: gateway.router().subscriber_count(ride_id),
        });
    }
    Ok(Json(summaries))
}

/// POST /api/rides/{ride_id}/participants
/// Registers a participant admitted by the PIN check
pub async fn register_participant(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
    Json(request): Json<RegisterParticipantRequest>,
) -> Result<(StatusCode, Json<ParticipantResponse>), RideError> {
    let ride_id = parse_ride_id(&ride_id)?;
    let upserted = state
        .gateway
        .register_participant(ride_id, &request.user_id, request.role)
        .await?;

    let status = if upserted.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ParticipantResponse {
            ride_id,
            user_id: request.user_id,
            created: upserted.created,
            presence: upserted.record,
        }),
    ))
}

/// DELETE /api/rides/{ride_id}
/// Ends the ride for every connected participant
pub async fn end_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<String>,
) -> Result<Json<RideEndedResponse>, RideError> {
    let ride_id = parse_ride_id(&ride_id)?;
    let notified = state.gateway.end_ride(ride_id).await;
    Ok(Json(RideEndedResponse { ride_id, notified }))
}
