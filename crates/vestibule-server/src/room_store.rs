//! Room records and their membership, sharded by room code.
//!
//! The store owns every `Room` exclusively; callers go through the
//! operations here and never hold references into a record. All methods
//! are synchronous and touch at most one room, so nothing suspends
//! while a shard lock is held. Deadlines are enforced lazily on access,
//! the scheduled expiry task is a backstop, not the source of truth.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use vestibule_core::message::Message;
use vestibule_core::room::{RoomSettings, RoomSnapshot, RoomUser, UserSummary};
use vestibule_core::{ConnectionId, UserId, code, time};

use crate::error::RoomError;

struct RoomRecord {
    created_at_ms: u64,
    expires_at_ms: u64,
    users: Vec<RoomUser>,
    messages: Vec<Message>,
    settings: RoomSettings,
    host: Option<ConnectionId>,
}

impl RoomRecord {
    fn new(now_ms: u64, lifetime: Duration, settings: RoomSettings) -> Self {
        Self {
            created_at_ms: now_ms,
            expires_at_ms: now_ms + lifetime.as_millis() as u64,
            users: Vec::new(),
            messages: Vec::new(),
            settings,
            host: None,
        }
    }

    fn snapshot(&self, room_code: &str, now_ms: u64) -> RoomSnapshot {
        RoomSnapshot {
            code: room_code.to_string(),
            users: self
                .users
                .iter()
                .map(|u| UserSummary {
                    user_id: u.user_id,
                    nickname: u.nickname.clone(),
                    is_host: self.host == Some(u.connection_id),
                })
                .collect(),
            invite_only: self.settings.invite_only,
            requires_password: self.settings.requires_password(),
            max_users: self.settings.max_users,
            expires_in_seconds: self.expires_at_ms.saturating_sub(now_ms) / 1000,
        }
    }

    fn visible_messages(&mut self, viewer: UserId, now_ms: u64) -> Vec<Message> {
        self.messages.retain(|m| !m.is_expired(now_ms));
        self.messages
            .iter()
            .filter(|m| m.visible_to(viewer))
            .cloned()
            .collect()
    }
}

/// Result of admitting a user into a room.
#[derive(Debug)]
pub struct JoinAccepted {
    pub rejoined: bool,
    pub user: RoomUser,
    /// Everyone in the room after the join, oldest first.
    pub members: Vec<RoomUser>,
    /// Message backlog visible to the joining user.
    pub messages: Vec<Message>,
    pub snapshot: RoomSnapshot,
}

/// Result of removing a user from a room.
pub struct LeaveOutcome {
    pub removed: RoomUser,
    pub was_host: bool,
    pub room_deleted: bool,
    /// Oldest remaining member, promoted in the same critical section
    /// when the departing user held the host slot.
    pub new_host: Option<RoomUser>,
    /// Remaining members, oldest first.
    pub members: Vec<RoomUser>,
}

/// Result of appending a message, with the final stamped message.
pub struct MessagePosted {
    pub message: Message,
    pub members: Vec<RoomUser>,
}

/// Credential-relevant facts about a room, read before verification.
pub struct RoomAuthView {
    pub requires_password: bool,
    pub password_hash: Option<String>,
    pub invite_only: bool,
    pub member_count: usize,
    pub host: Option<ConnectionId>,
}

/// Public-facing room facts for the metadata endpoint.
#[derive(Debug)]
pub struct RoomMetadata {
    pub requires_password: bool,
    pub invite_only: bool,
    pub user_count: usize,
    pub max_users: u8,
    pub expires_in_seconds: u64,
}

pub struct RoomStore {
    rooms: DashMap<String, RoomRecord>,
    lifetime: Duration,
    code_attempts: u32,
}

impl RoomStore {
    pub fn new(lifetime: Duration, code_attempts: u32) -> Self {
        Self {
            rooms: DashMap::new(),
            lifetime,
            code_attempts,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Creates a room under a freshly sampled unique code. A code
    /// colliding with a live room is resampled, up to the configured
    /// attempt budget; a code held by an expired, unswept room is
    /// reclaimed in place.
    pub fn create(&self, settings: RoomSettings) -> Result<String, RoomError> {
        let now = time::unix_millis();
        for _ in 0..self.code_attempts {
            let room_code = code::generate_room_code();
            match self.rooms.entry(room_code.clone()) {
                Entry::Occupied(mut slot) => {
                    if slot.get().expires_at_ms <= now {
                        slot.insert(RoomRecord::new(now, self.lifetime, settings.clone()));
                        tracing::info!(room = %room_code, "Room created on reclaimed code");
                        return Ok(room_code);
                    }
                },
                Entry::Vacant(slot) => {
                    slot.insert(RoomRecord::new(now, self.lifetime, settings.clone()));
                    tracing::info!(room = %room_code, "Room created");
                    return Ok(room_code);
                },
            }
        }
        tracing::error!(attempts = self.code_attempts, "Room code generation exhausted");
        Err(RoomError::CodeGenerationExhausted)
    }

    fn remove_if_expired(&self, room_code: &str, now_ms: u64) -> bool {
        match self.rooms.remove_if(room_code, |_, room| room.expires_at_ms <= now_ms) {
            Some((code, room)) => {
                tracing::info!(room = %code, users = room.users.len(), "Expired room removed on access");
                true
            },
            None => false,
        }
    }

    /// Reads the facts needed before password/token verification.
    /// Expired rooms are deleted on the way.
    pub fn auth_view(&self, room_code: &str) -> Result<RoomAuthView, RoomError> {
        let now = time::unix_millis();
        if self.remove_if_expired(room_code, now) {
            return Err(RoomError::RoomExpired);
        }
        match self.rooms.get(room_code) {
            Some(room) => Ok(RoomAuthView {
                requires_password: room.settings.requires_password(),
                password_hash: room.settings.password_hash.clone(),
                invite_only: room.settings.invite_only,
                member_count: room.users.len(),
                host: room.host,
            }),
            None => Err(RoomError::RoomNotFound),
        }
    }

    /// Admits `user`, re-validating expiry, capacity and the invite
    /// requirement against current state. A connection already in the
    /// room rejoins idempotently, keeping its identity and updating the
    /// nickname in place. Success pushes the room deadline forward.
    ///
    /// The first user into an empty room becomes its host.
    pub fn join_user(
        &self,
        room_code: &str,
        user: RoomUser,
        has_valid_token: bool,
    ) -> Result<JoinAccepted, RoomError> {
        let now = time::unix_millis();
        if self.remove_if_expired(room_code, now) {
            return Err(RoomError::RoomExpired);
        }
        let mut room = self.rooms.get_mut(room_code).ok_or(RoomError::RoomNotFound)?;

        let position = room
            .users
            .iter()
            .position(|u| u.connection_id == user.connection_id);
        match position {
            Some(i) => {
                room.users[i].nickname = user.nickname.clone();
            },
            None => {
                if room.users.len() >= room.settings.max_users as usize {
                    return Err(RoomError::RoomFull);
                }
                // Bootstrap join into an empty room needs no invite.
                if room.settings.invite_only && !room.users.is_empty() && !has_valid_token {
                    return Err(RoomError::InvalidOrExpiredToken);
                }
                if room.users.is_empty() {
                    room.host = Some(user.connection_id);
                }
                room.users.push(user.clone());
            },
        }

        room.expires_at_ms = now + self.lifetime.as_millis() as u64;
        let joined = match position {
            Some(i) => room.users[i].clone(),
            None => user,
        };
        let members = room.users.clone();
        let messages = room.visible_messages(joined.user_id, now);
        let snapshot = room.snapshot(room_code, now);
        tracing::info!(
            room = %room_code,
            user = %joined.nickname,
            rejoined = position.is_some(),
            "User joined room"
        );
        Ok(JoinAccepted {
            rejoined: position.is_some(),
            user: joined,
            members,
            messages,
            snapshot,
        })
    }

    /// Removes the user. The last user out deletes the room on the
    /// spot; callers cancel its expiry task and cascade token cleanup
    /// when `room_deleted` is set. A departing host hands the slot to
    /// the oldest remaining member inside the same critical section,
    /// so two interleaved leaves can never strand a hostless room.
    pub fn leave(&self, room_code: &str, connection_id: ConnectionId) -> Option<LeaveOutcome> {
        let mut room = self.rooms.get_mut(room_code)?;
        let index = room
            .users
            .iter()
            .position(|u| u.connection_id == connection_id)?;
        let removed = room.users.remove(index);
        let was_host = room.host == Some(connection_id);
        let mut new_host = None;
        if was_host {
            room.host = room.users.first().map(|u| u.connection_id);
            new_host = room.users.first().cloned();
        }
        let members = room.users.clone();
        let empty = room.users.is_empty();
        drop(room);

        let mut room_deleted = false;
        if empty {
            // Re-checked under the entry lock: a join may have landed
            // since we released it.
            if let Some((code, record)) = self.rooms.remove_if(room_code, |_, r| r.users.is_empty())
            {
                let lived_secs = time::unix_millis().saturating_sub(record.created_at_ms) / 1000;
                tracing::info!(room = %code, lived_secs, "Room deleted, last user left");
                room_deleted = true;
            }
        }
        tracing::info!(room = %room_code, user = %removed.nickname, "User left room");
        Some(LeaveOutcome {
            removed,
            was_host,
            room_deleted,
            new_host,
            members,
        })
    }

    /// Stamps the message with the room's per-message TTL, appends it
    /// (view-once messages are broadcast-only, never stored) and pushes
    /// the room deadline forward.
    pub fn add_message(
        &self,
        room_code: &str,
        mut message: Message,
    ) -> Result<MessagePosted, RoomError> {
        let now = time::unix_millis();
        if self.remove_if_expired(room_code, now) {
            return Err(RoomError::RoomExpired);
        }
        let mut room = self.rooms.get_mut(room_code).ok_or(RoomError::RoomNotFound)?;
        let ttl = room.settings.message_ttl;
        if !ttl.is_zero() {
            message.expires_at = Some(now + ttl.as_millis() as u64);
        }
        room.messages.retain(|m| !m.is_expired(now));
        if !message.view_once {
            room.messages.push(message.clone());
        }
        room.expires_at_ms = now + self.lifetime.as_millis() as u64;
        let members = room.users.clone();
        Ok(MessagePosted { message, members })
    }

    /// Fired-expiry handler: deletes the room only if its deadline has
    /// actually passed. A task that lost a race against a TTL refresh
    /// finds a future deadline and does nothing; the refresh armed its
    /// own replacement task.
    pub fn sweep_expired(&self, room_code: &str) -> Option<Vec<RoomUser>> {
        let now = time::unix_millis();
        let (code, record) = self
            .rooms
            .remove_if(room_code, |_, room| room.expires_at_ms <= now)?;
        let lived_secs = now.saturating_sub(record.created_at_ms) / 1000;
        tracing::info!(room = %code, users = record.users.len(), lived_secs, "Room expired");
        Some(record.users)
    }

    pub fn host_of(&self, room_code: &str) -> Option<ConnectionId> {
        self.rooms.get(room_code).and_then(|room| room.host)
    }

    pub fn members(&self, room_code: &str) -> Vec<RoomUser> {
        self.rooms
            .get(room_code)
            .map(|room| room.users.clone())
            .unwrap_or_default()
    }

    pub fn metadata(&self, room_code: &str) -> Result<RoomMetadata, RoomError> {
        let now = time::unix_millis();
        if self.remove_if_expired(room_code, now) {
            return Err(RoomError::RoomExpired);
        }
        match self.rooms.get(room_code) {
            Some(room) => Ok(RoomMetadata {
                requires_password: room.settings.requires_password(),
                invite_only: room.settings.invite_only,
                user_count: room.users.len(),
                max_users: room.settings.max_users,
                expires_in_seconds: room.expires_at_ms.saturating_sub(now) / 1000,
            }),
            None => Err(RoomError::RoomNotFound),
        }
    }

    /// True while the room exists and its deadline is in the future.
    pub fn is_live(&self, room_code: &str) -> bool {
        self.rooms
            .get(room_code)
            .is_some_and(|room| room.expires_at_ms > time::unix_millis())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
