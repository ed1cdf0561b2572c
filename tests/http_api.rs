use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use ride_presence::{
    api::{
        presence::get_presence,
        rides::{RegisterParticipantRequest, end_ride, list_rides, register_participant},
    },
    config::Config,
    ride::{RideError, RideId, Role},
    server::AppState,
};

fn state() -> AppState {
    AppState::new(&Config::default())
}

async fn register(state: &AppState, ride: &str, user: &str, role: Option<Role>) -> StatusCode {
    let request = RegisterParticipantRequest {
        user_id: user.to_string(),
        role,
    };
    match register_participant(State(state.clone()), Path(ride.to_string()), Json(request)).await {
        Ok((status, _)) => status,
        Err(e) => e.status(),
    }
}

#[tokio::test]
async fn registering_twice_creates_then_touches() {
    let state = state();
    assert_eq!(register(&state, "5", "org", Some(Role::Organizer)).await, StatusCode::CREATED);
    assert_eq!(register(&state, "5", "org", None).await, StatusCode::OK);

    let Json(rides) = list_rides(State(state.clone())).await.unwrap();
    assert_eq!(rides.len(), 1);
    assert_eq!(rides[0].ride_id, RideId::new(5));
    assert_eq!(rides[0].participant_count, 1);
    assert_eq!(rides[0].subscriber_count, 0);

    let Json(presence) = get_presence(State(state.clone()), Path("5".to_string()))
        .await
        .unwrap();
    assert_eq!(presence.users["org"].role(), Role::Organizer);
}

#[tokio::test]
async fn malformed_ride_ids_are_bad_requests() {
    let state = state();
    assert_eq!(register(&state, "five", "a", None).await, StatusCode::BAD_REQUEST);

    let err = get_presence(State(state), Path("five".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err, RideError::InvalidRideId);
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_rides_have_no_presence() {
    let err = get_presence(State(state()), Path("9".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ended_rides_refuse_new_participants() {
    let state = state();
    register(&state, "3", "a", None).await;

    let Json(ended) = end_ride(State(state.clone()), Path("3".to_string()))
        .await
        .unwrap();
    assert_eq!(ended.ride_id, RideId::new(3));
    assert_eq!(ended.notified, 0);

    assert_eq!(register(&state, "3", "a", None).await, StatusCode::GONE);
    let Json(rides) = list_rides(State(state)).await.unwrap();
    assert!(rides.is_empty());
}
