pub mod record;
pub mod store;

use std::collections::HashMap;

pub use record::{PresenceRecord, Position, Role};
pub use store::{PresenceStore, Upserted};

use super::UserId;

/// Full, replacing view of every presence record in one ride.
pub type Snapshot = HashMap<UserId, PresenceRecord>;
