use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConnectionId, UserId};

/// Settings fixed at room creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    /// How long each message lives. Zero means messages last as long as
    /// the room does.
    pub message_ttl: Duration,
    /// Salted hash of the room password. `None` means the room is open.
    pub password_hash: Option<String>,
    /// Invite-only rooms hand out a permanent invite token at creation.
    pub invite_only: bool,
    pub max_users: u8,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            message_ttl: Duration::ZERO,
            password_hash: None,
            invite_only: false,
            max_users: 8,
        }
    }
}

impl RoomSettings {
    pub fn requires_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// A user currently inside a room. Insertion order is the room's seniority
/// order: the first entry is the oldest member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUser {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub nickname: String,
    /// Unix millis at join time.
    pub joined_at: u64,
}

/// What a joiner learns about a room, safe to put on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub users: Vec<UserSummary>,
    pub invite_only: bool,
    pub requires_password: bool,
    pub max_users: u8,
    pub expires_in_seconds: u64,
}

/// Per-user entry in a [`RoomSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub nickname: String,
    pub is_host: bool,
}
