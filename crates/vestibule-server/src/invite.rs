//! Invite tokens, sharded by token string.
//!
//! A token either lives as long as its room (permanent) or is
//! single-use with an expiry. Validation has a non-consuming peek mode:
//! the join protocol peeks before attempting the join and consumes only
//! after the join succeeds, so a join that fails for unrelated reasons
//! never burns a token. Consumption re-checks remaining uses under the
//! token's entry lock, two racing consumers get exactly one success.

use std::time::Duration;

use dashmap::DashMap;
use vestibule_core::{time, token};

use crate::error::RoomError;

struct InviteRecord {
    room_code: String,
    expires_at_ms: Option<u64>,
    permanent: bool,
    max_uses: u32,
    uses: u32,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    Valid { room_code: String, permanent: bool },
    /// Token is real but belongs to a different room than the caller
    /// asked about. Never consumed; the caller routes the user there.
    Redirect { room_code: String },
}

/// A freshly issued token with its deadline, if any.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: Option<Duration>,
}

pub struct InviteTokenRegistry {
    tokens: DashMap<String, InviteRecord>,
    default_ttl: Duration,
}

impl InviteTokenRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issues a token for `room_code`. Permanent tokens never expire
    /// and are never consumed; others are single-use with a TTL. The
    /// caller schedules the expiry task for non-permanent tokens.
    pub fn issue(&self, room_code: &str, permanent: bool, ttl: Option<Duration>) -> IssuedToken {
        let value = token::generate_invite_token();
        let expires_in = (!permanent).then(|| ttl.unwrap_or(self.default_ttl));
        let record = InviteRecord {
            room_code: room_code.to_string(),
            expires_at_ms: expires_in.map(|ttl| time::unix_millis() + ttl.as_millis() as u64),
            permanent,
            max_uses: 1,
            uses: 0,
        };
        self.tokens.insert(value.clone(), record);
        tracing::info!(room = %room_code, permanent, "Invite token issued");
        IssuedToken {
            token: value,
            expires_in,
        }
    }

    /// Resolves a token. Shape is checked before any lookup, expired
    /// records are deleted on the way. With `consume` set, a one-time
    /// token is spent atomically; peeks never change use counts.
    pub fn validate(
        &self,
        value: &str,
        expected_room: Option<&str>,
        consume: bool,
    ) -> Result<TokenCheck, RoomError> {
        if !token::is_valid_token_format(value) {
            return Err(RoomError::InvalidOrExpiredToken);
        }
        let now = time::unix_millis();
        if self.remove_if_expired(value, now) {
            return Err(RoomError::InvalidOrExpiredToken);
        }

        let mut record = match self.tokens.get_mut(value) {
            Some(record) => record,
            None => return Err(RoomError::InvalidOrExpiredToken),
        };
        let room_code = record.room_code.clone();
        let permanent = record.permanent;

        if let Some(expected) = expected_room
            && expected != room_code
        {
            return Ok(TokenCheck::Redirect { room_code });
        }

        if consume && !permanent {
            // The peek that led here proves nothing anymore; re-check
            // remaining uses under the entry lock.
            if record.uses >= record.max_uses {
                return Err(RoomError::InvalidOrExpiredToken);
            }
            record.uses += 1;
            let spent = record.uses >= record.max_uses;
            drop(record);
            if spent {
                self.tokens.remove_if(value, |_, r| r.uses >= r.max_uses);
                tracing::info!(room = %room_code, "Invite token consumed");
            }
        }

        Ok(TokenCheck::Valid {
            room_code,
            permanent,
        })
    }

    /// Deletes the token if its deadline has passed. Doubles as the
    /// fired-expiry handler.
    pub fn remove_if_expired(&self, value: &str, now_ms: u64) -> bool {
        self.tokens
            .remove_if(value, |_, record| {
                record.expires_at_ms.is_some_and(|at| at <= now_ms)
            })
            .is_some()
    }

    /// Drops every token pointing at `room_code`. Runs synchronously
    /// whenever a room is deleted so no token outlives its room.
    /// Returns the purged token values so callers can cancel their
    /// pending expiry tasks.
    pub fn purge_room(&self, room_code: &str) -> Vec<String> {
        let mut purged = Vec::new();
        self.tokens.retain(|value, record| {
            if record.room_code == room_code {
                purged.push(value.clone());
                false
            } else {
                true
            }
        });
        if !purged.is_empty() {
            tracing::info!(room = %room_code, purged = purged.len(), "Purged invite tokens for deleted room");
        }
        purged
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
