use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Organizer,
    #[default]
    Rider,
}

/// A complete coordinate pair. There is no way to hold one axis without the other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One participant's current role, position and recency within a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PresenceRecord {
    role: Role,
    position: Option<Position>,
    last_seen: DateTime<Utc>,
    connected_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn new(role: Role, now: DateTime<Utc>) -> Self {
        Self {
            role,
            position: None,
            last_seen: now,
            connected_at: now,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Bumps `last_seen`, never moving it backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn move_to(&mut self, position: Position, now: DateTime<Utc>) {
        self.position = Some(position);
        self.touch(now);
    }

    pub(crate) fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn touch_never_moves_last_seen_backwards() {
        let now = Utc::now();
        let mut record = PresenceRecord::new(Role::Rider, now);

        record.touch(now - TimeDelta::seconds(30));
        assert_eq!(record.last_seen(), now);

        let later = now + TimeDelta::seconds(5);
        record.touch(later);
        assert_eq!(record.last_seen(), later);
        assert_eq!(record.connected_at(), now);
    }

    #[test]
    fn serializes_with_null_position_until_first_fix() {
        let now = Utc::now();
        let mut record = PresenceRecord::new(Role::Organizer, now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "organizer");
        assert!(json["position"].is_null());
        assert!(json["lastSeen"].is_string());
        assert!(json["connectedAt"].is_string());

        record.move_to(Position::new(40.0, -74.0), now);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["position"]["lat"], 40.0);
        assert_eq!(json["position"]["lng"], -74.0);
    }
}
