use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{StreamId, TargetId};
use crate::token::AuthToken;

/// Whether the stream's document-store record is still being written to.
/// Owned and flipped by external code through [`crate::Manager::modify_stream`];
/// the core never changes it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MongoStatus {
    Enabled,
    Disabled,
}

/// Transient record attached to a [`Stream`] while it is checked out to a
/// core. Created by `activate_stream`, destroyed by `deactivate_stream` or
/// `remove_stream`; never mutated except under the containing stream's
/// write lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveStream {
    pub auth_token: AuthToken,
    pub user: String,
    pub engine: String,
    pub start_time: DateTime<Utc>,
    pub donor_frames: f64,
    pub buffer_frames: u64,
    pub frame_hash: Option<String>,
}

impl ActiveStream {
    pub(crate) fn new(auth_token: AuthToken, user: String, engine: String) -> Self {
        Self {
            auth_token,
            user,
            engine,
            start_time: Utc::now(),
            donor_frames: 0.0,
            buffer_frames: 0,
            frame_hash: None,
        }
    }
}

/// One trajectory's in-memory record. Immutable fields (`stream_id`,
/// `target_id`, `owner`) are safe to read without holding the stream's lock;
/// everything else requires it. The stream has no knowledge of the
/// [`crate::Manager`] or [`crate::Target`] that own it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub stream_id: StreamId,
    pub target_id: TargetId,
    pub owner: String,
    pub frames: u64,
    pub error_count: u64,
    pub creation_date: DateTime<Utc>,
    pub mongo_status: MongoStatus,
    pub active: Option<ActiveStream>,
}

impl Stream {
    #[must_use]
    pub fn new(stream_id: StreamId, target_id: TargetId, owner: impl Into<String>) -> Self {
        Self {
            stream_id,
            target_id,
            owner: owner.into(),
            frames: 0,
            error_count: 0,
            creation_date: Utc::now(),
            mongo_status: MongoStatus::Enabled,
            active: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stream_starts_inactive_with_zero_counters() {
        let s = Stream::new(StreamId::new("s1"), TargetId::new("t1"), "alice");
        assert!(!s.is_active());
        assert_eq!(s.frames, 0);
        assert_eq!(s.error_count, 0);
        assert_eq!(s.mongo_status, MongoStatus::Enabled);
    }
}
