use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use ride_presence::ride::{
    ChannelRouter, OpenRides, PresenceStore, Position, RideError, RideId, Role, SessionGateway,
    Snapshot, SnapshotBroadcaster, StalenessReaper,
    broadcaster::DEFAULT_SNAPSHOT_INTERVAL,
    message::{LocationReport, ServerMessage},
    reaper::{DEFAULT_REAP_INTERVAL, DEFAULT_STALE_AFTER},
    session::{Connection, ConnectionState},
};

const RIDE: RideId = RideId::new(1);

struct Harness {
    gateway: SessionGateway,
    broadcaster: SnapshotBroadcaster,
    reaper: StalenessReaper,
}

fn harness() -> Harness {
    let store = Arc::new(PresenceStore::new());
    let router = Arc::new(ChannelRouter::new());
    let gateway = SessionGateway::new(
        Arc::clone(&store),
        Arc::clone(&router),
        Arc::new(OpenRides::new()),
        64,
    );
    let broadcaster =
        SnapshotBroadcaster::new(Arc::clone(&store), router, DEFAULT_SNAPSHOT_INTERVAL);
    let reaper = StalenessReaper::new(store, DEFAULT_REAP_INTERVAL, DEFAULT_STALE_AFTER);
    Harness {
        gateway,
        broadcaster,
        reaper,
    }
}

fn last_snapshot(connection: &mut Connection) -> Option<Snapshot> {
    connection
        .drain()
        .into_iter()
        .filter_map(|message| match message {
            ServerMessage::UserSnapshot(snapshot) => Some(snapshot),
            _ => None,
        })
        .last()
}

#[tokio::test]
async fn join_report_and_disconnect_are_reflected_in_snapshots() {
    let h = harness();
    let mut a = h.gateway.connect();
    let mut b = h.gateway.connect();

    h.gateway.join(a.id(), RIDE, "a", Some(Role::Organizer)).await.unwrap();
    h.gateway.join(b.id(), RIDE, "b", Some(Role::Rider)).await.unwrap();
    h.gateway
        .report(b.id(), LocationReport::new(RIDE, "b", 40.0, -74.0))
        .await
        .unwrap();

    assert_eq!(h.broadcaster.tick(), 1);

    let snapshot = last_snapshot(&mut a).unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["a"].role(), Role::Organizer);
    assert_eq!(snapshot["a"].position(), None);
    assert_eq!(snapshot["b"].role(), Role::Rider);
    assert_eq!(snapshot["b"].position(), Some(Position::new(40.0, -74.0)));
    assert_eq!(last_snapshot(&mut b), Some(snapshot));

    h.gateway.disconnect(&a.id());
    assert_eq!(h.gateway.connection_state(&a.id()), ConnectionState::Closed);

    h.broadcaster.tick();
    let snapshot = last_snapshot(&mut b).unwrap();
    assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["b"]);
}

#[tokio::test]
async fn invalid_coordinates_leave_the_prior_position() {
    let h = harness();
    let mut b = h.gateway.connect();
    h.gateway.join(b.id(), RIDE, "b", None).await.unwrap();
    h.gateway
        .report(b.id(), LocationReport::new(RIDE, "b", 40.0, -74.0))
        .await
        .unwrap();

    let err = h
        .gateway
        .report(b.id(), LocationReport::new(RIDE, "b", f64::NAN, -74.0))
        .await
        .unwrap_err();
    assert!(matches!(err, RideError::Ingest(e) if e.is_validation()));

    h.broadcaster.tick();
    let snapshot = last_snapshot(&mut b).unwrap();
    assert_eq!(snapshot["b"].position(), Some(Position::new(40.0, -74.0)));
}

#[tokio::test]
async fn many_updates_between_ticks_produce_one_snapshot_with_the_last_value() {
    let h = harness();
    let mut b = h.gateway.connect();
    h.gateway.join(b.id(), RIDE, "b", None).await.unwrap();

    for step in 1..=25 {
        h.gateway
            .report(b.id(), LocationReport::new(RIDE, "b", step as f64, 0.0))
            .await
            .unwrap();
    }
    h.broadcaster.tick();

    let snapshots: Vec<_> = b
        .drain()
        .into_iter()
        .filter(|message| matches!(message, ServerMessage::UserSnapshot(_)))
        .collect();
    assert_eq!(snapshots.len(), 1);
    let ServerMessage::UserSnapshot(snapshot) = &snapshots[0] else {
        unreachable!();
    };
    assert_eq!(snapshot["b"].position(), Some(Position::new(25.0, 0.0)));
}

#[tokio::test]
async fn ending_a_ride_is_final() {
    let h = harness();
    let mut a = h.gateway.connect();
    let mut b = h.gateway.connect();
    h.gateway.join(a.id(), RIDE, "a", Some(Role::Organizer)).await.unwrap();
    h.gateway.join(b.id(), RIDE, "b", None).await.unwrap();

    assert_eq!(h.gateway.end_ride(RIDE).await, 2);

    for connection in [&mut a, &mut b] {
        assert!(
            connection
                .drain()
                .iter()
                .any(|message| matches!(message, ServerMessage::RideEnded { ride_id, .. } if *ride_id == RIDE))
        );
    }
    assert!(h.gateway.store().snapshot(RIDE).unwrap().is_empty());
    assert_eq!(h.gateway.router().subscriber_count(RIDE), 0);
    assert_eq!(h.broadcaster.tick(), 0);

    let err = h
        .gateway
        .report(b.id(), LocationReport::new(RIDE, "b", 1.0, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err, RideError::NotJoined);
    assert!(h.gateway.store().get(RIDE, "b").unwrap().is_none());

    let rejoiner = h.gateway.connect();
    assert_eq!(
        h.gateway.join(rejoiner.id(), RIDE, "b", None).await,
        Err(RideError::RideNotActive(RIDE))
    );
}

#[tokio::test]
async fn silent_clients_are_reaped_and_drop_out_of_snapshots() {
    let h = harness();
    let mut a = h.gateway.connect();
    let b = h.gateway.connect();
    h.gateway.join(a.id(), RIDE, "a", None).await.unwrap();
    h.gateway.join(b.id(), RIDE, "b", None).await.unwrap();

    assert_eq!(h.reaper.tick(), 0);

    let later = Utc::now() + TimeDelta::seconds(121);
    assert_eq!(h.reaper.tick_at(later), 2);
    assert_eq!(h.broadcaster.tick(), 0);
    assert!(last_snapshot(&mut a).is_none());
}
