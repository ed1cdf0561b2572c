use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};

use super::{PresenceRecord, Position, Role, Snapshot};
use crate::ride::{RideId, UserId, error::StoreError};

/// Outcome of [`PresenceStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: PresenceRecord,
    pub created: bool,
}

/// Presence records of a single ride. Each ride has its own lock so that
/// writers in one ride never wait on another ride.
#[derive(Debug, Default)]
struct RidePresence {
    users: RwLock<HashMap<UserId, PresenceRecord>>,
}

/// Authoritative in-memory mapping of ride -> (user -> presence record).
///
/// The outer map is only write-locked to add or drop a ride's shard. Every
/// other operation takes the outer lock shared and the ride's own lock, and
/// no guard is ever held across an `.await`.
#[derive(Debug, Default)]
pub struct PresenceStore {
    rides: RwLock<HashMap<RideId, Arc<RidePresence>>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record if absent, otherwise touches `last_seen`.
    ///
    /// A new record takes `role` (or [`Role::Rider`] when none is given); an
    /// existing record only changes role when one is supplied.
    pub fn upsert(
        &self,
        ride_id: RideId,
        user_id: &str,
        role: Option<Role>,
    ) -> Result<Upserted, StoreError> {
        let now = Utc::now();
        loop {
            let upserted = self.with_shard(ride_id, |users| {
                let created = !users.contains_key(user_id);
                let record = users
                    .entry(user_id.to_string())
                    .and_modify(|record| {
                        record.touch(now);
                        if let Some(role) = role {
                            record.set_role(role);
                        }
                    })
                    .or_insert_with(|| PresenceRecord::new(role.unwrap_or_default(), now))
                    .clone();
                Upserted { record, created }
            })?;
            if let Some(upserted) = upserted {
                return Ok(upserted);
            }
            self.write_rides()?.entry(ride_id).or_default();
        }
    }

    /// Applies a position to an existing record.
    ///
    /// Returns `false` when the ride or the user is not registered; the caller
    /// decides whether to register first.
    pub fn update_location(
        &self,
        ride_id: RideId,
        user_id: &str,
        position: Position,
        role: Option<Role>,
    ) -> Result<bool, StoreError> {
        let applied = self.with_shard(ride_id, |users| match users.get_mut(user_id) {
            Some(record) => {
                record.move_to(position, Utc::now());
                if let Some(role) = role {
                    record.set_role(role);
                }
                true
            }
            None => false,
        })?;
        Ok(applied.unwrap_or(false))
    }

    pub fn get(&self, ride_id: RideId, user_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        let rides = self.read_rides()?;
        let Some(shard) = rides.get(&ride_id) else {
            return Ok(None);
        };
        let users = read_users(shard, ride_id)?;
        Ok(users.get(user_id).cloned())
    }

    /// Point-in-time copy of a ride's records. Unknown rides yield an empty snapshot.
    pub fn snapshot(&self, ride_id: RideId) -> Result<Snapshot, StoreError> {
        let rides = self.read_rides()?;
        let Some(shard) = rides.get(&ride_id) else {
            return Ok(Snapshot::new());
        };
        let users = read_users(shard, ride_id)?;
        Ok(users.clone())
    }

    pub fn participant_count(&self, ride_id: RideId) -> Result<usize, StoreError> {
        let rides = self.read_rides()?;
        let Some(shard) = rides.get(&ride_id) else {
            return Ok(0);
        };
        let users = read_users(shard, ride_id)?;
        Ok(users.len())
    }

    /// Removes one record, dropping the ride's shard once it is empty.
    pub fn remove(&self, ride_id: RideId, user_id: &str) -> Result<bool, StoreError> {
        let mut rides = self.write_rides()?;
        let Some(shard) = rides.get(&ride_id) else {
            return Ok(false);
        };

        let (removed, now_empty) = {
            let mut users = write_users(shard, ride_id)?;
            let removed = users.remove(user_id).is_some();
            (removed, users.is_empty())
        };
        if now_empty {
            rides.remove(&ride_id);
        }
        Ok(removed)
    }

    /// Drops every record of a ride. Returns how many were removed.
    pub fn clear_ride(&self, ride_id: RideId) -> Result<usize, StoreError> {
        let Some(shard) = self.write_rides()?.remove(&ride_id) else {
            return Ok(0);
        };
        let users = write_users(&shard, ride_id)?;
        Ok(users.len())
    }

    /// Rides that currently hold at least one record.
    pub fn list_non_empty_rides(&self) -> Result<BTreeSet<RideId>, StoreError> {
        let rides = self.read_rides()?;
        let mut non_empty = BTreeSet::new();
        for (ride_id, shard) in rides.iter() {
            match read_users(shard, *ride_id) {
                Ok(users) if !users.is_empty() => {
                    non_empty.insert(*ride_id);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(%ride_id, error = %e, "Skipping unreadable ride"),
            }
        }
        Ok(non_empty)
    }

    /// Removes every record, across all rides, whose `last_seen` precedes
    /// `cutoff`. Rides left empty are dropped. A ride whose lock is poisoned
    /// is skipped without affecting the others.
    pub fn reap_stale_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rides = self.write_rides()?;
        let mut reaped = 0;
        let mut emptied = Vec::new();

        for (ride_id, shard) in rides.iter() {
            let mut users = match write_users(shard, *ride_id) {
                Ok(users) => users,
                Err(e) => {
                    tracing::warn!(%ride_id, error = %e, "Skipping ride during reaping");
                    continue;
                }
            };
            let before = users.len();
            users.retain(|user_id, record| {
                let stale = record.is_stale(cutoff);
                if stale {
                    tracing::debug!(%ride_id, %user_id, last_seen = %record.last_seen(), "Evicting stale presence");
                }
                !stale
            });
            reaped += before - users.len();
            if users.is_empty() {
                emptied.push(*ride_id);
            }
        }

        for ride_id in emptied {
            rides.remove(&ride_id);
        }
        Ok(reaped)
    }

    /// Runs `f` on a ride's records while the index stays read-locked, so the
    /// shard cannot be dropped underneath the write. `None` if the ride has no shard.
    fn with_shard<R>(
        &self,
        ride_id: RideId,
        f: impl FnOnce(&mut HashMap<UserId, PresenceRecord>) -> R,
    ) -> Result<Option<R>, StoreError> {
        let rides = self.read_rides()?;
        let Some(shard) = rides.get(&ride_id) else {
            return Ok(None);
        };
        let mut users = write_users(shard, ride_id)?;
        let result = f(&mut *users);
        Ok(Some(result))
    }

    fn read_rides(&self) -> Result<RwLockReadGuard<'_, HashMap<RideId, Arc<RidePresence>>>, StoreError> {
        self.rides
            .read()
            .map_err(|_| StoreError::LockPoisoned("ride index".to_string()))
    }

    fn write_rides(&self) -> Result<RwLockWriteGuard<'_, HashMap<RideId, Arc<RidePresence>>>, StoreError> {
        self.rides
            .write()
            .map_err(|_| StoreError::LockPoisoned("ride index".to_string()))
    }
}

fn read_users(
    shard: &RidePresence,
    ride_id: RideId,
) -> Result<RwLockReadGuard<'_, HashMap<UserId, PresenceRecord>>, StoreError> {
    shard
        .users
        .read()
        .map_err(|_| StoreError::LockPoisoned(format!("ride {ride_id}")))
}

fn write_users(
    shard: &RidePresence,
    ride_id: RideId,
) -> Result<RwLockWriteGuard<'_, HashMap<UserId, PresenceRecord>>, StoreError> {
    shard
        .users
        .write()
        .map_err(|_| StoreError::LockPoisoned(format!("ride {ride_id}")))
}
