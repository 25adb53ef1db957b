//! Knock-to-join admission, per room.
//!
//! A knock against an empty room is auto-approved and claims hostship;
//! otherwise the guest waits in the room's lobby until the current host
//! approves or denies. Approval only admits the guest to attempt a
//! join, capacity and credentials are re-checked by the join itself.

use std::sync::Arc;

use dashmap::DashMap;
use vestibule_core::ConnectionId;
use vestibule_core::net::ServerFrame;

use crate::error::RoomError;
use crate::notify::Notifier;

#[derive(Debug, Clone)]
pub struct PendingGuest {
    pub connection_id: ConnectionId,
    pub nickname: String,
}

/// How a knock was answered immediately.
#[derive(Debug, PartialEq, Eq)]
pub enum KnockOutcome {
    /// Room was empty: auto-approved, the knocker becomes host when
    /// they join.
    Host,
    /// Queued in the lobby; the host has been notified.
    Pending,
}

pub struct LobbyCoordinator {
    lobbies: DashMap<String, Vec<PendingGuest>>,
    limit: usize,
    notifier: Arc<dyn Notifier>,
}

impl LobbyCoordinator {
    pub fn new(limit: usize, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            lobbies: DashMap::new(),
            limit,
            notifier,
        }
    }

    /// Handles a knock. `host` and `member_count` are the room's
    /// current facts as read by the caller.
    pub fn knock(
        &self,
        room_code: &str,
        guest: PendingGuest,
        host: Option<ConnectionId>,
        member_count: usize,
    ) -> Result<KnockOutcome, RoomError> {
        if member_count == 0 {
            tracing::info!(room = %room_code, guest = %guest.nickname, "Knock on empty room auto-approved");
            return Ok(KnockOutcome::Host);
        }

        let mut pending = self.lobbies.entry(room_code.to_string()).or_default();
        // A repeat knock from the same connection replaces its entry
        // instead of occupying a second slot.
        pending.retain(|g| g.connection_id != guest.connection_id);
        if pending.len() >= self.limit {
            return Err(RoomError::LobbyFull);
        }
        let frame = ServerFrame::KnockRequest {
            guest_id: guest.connection_id,
            nickname: guest.nickname.clone(),
        };
        tracing::info!(room = %room_code, guest = %guest.nickname, waiting = pending.len() + 1, "Guest knocking");
        pending.push(guest);
        drop(pending);

        if let Some(host) = host {
            self.notifier.send(host, frame);
        }
        Ok(KnockOutcome::Pending)
    }

    /// Host approved a guest. `Ok(None)` means the guest is no longer
    /// pending (disconnected or already resolved) and there is nothing
    /// to do.
    pub fn approve(
        &self,
        room_code: &str,
        guest_id: ConnectionId,
        caller: ConnectionId,
        host: Option<ConnectionId>,
    ) -> Result<Option<PendingGuest>, RoomError> {
        let guest = self.take_pending(room_code, guest_id, caller, host)?;
        if let Some(guest) = &guest {
            tracing::info!(room = %room_code, guest = %guest.nickname, "Knock approved");
        }
        Ok(guest)
    }

    /// Host denied a guest; same contract as [`approve`](Self::approve).
    pub fn deny(
        &self,
        room_code: &str,
        guest_id: ConnectionId,
        caller: ConnectionId,
        host: Option<ConnectionId>,
    ) -> Result<Option<PendingGuest>, RoomError> {
        let guest = self.take_pending(room_code, guest_id, caller, host)?;
        if let Some(guest) = &guest {
            tracing::info!(room = %room_code, guest = %guest.nickname, "Knock denied");
        }
        Ok(guest)
    }

    fn take_pending(
        &self,
        room_code: &str,
        guest_id: ConnectionId,
        caller: ConnectionId,
        host: Option<ConnectionId>,
    ) -> Result<Option<PendingGuest>, RoomError> {
        if host != Some(caller) {
            return Err(RoomError::Unauthorized);
        }
        let Some(mut pending) = self.lobbies.get_mut(room_code) else {
            return Ok(None);
        };
        let guest = pending
            .iter()
            .position(|g| g.connection_id == guest_id)
            .map(|i| pending.remove(i));
        let emptied = pending.is_empty();
        drop(pending);
        if emptied {
            self.lobbies.remove_if(room_code, |_, v| v.is_empty());
        }
        Ok(guest)
    }

    /// Drops a guest who went away while waiting.
    pub fn abandon(&self, room_code: &str, connection_id: ConnectionId) -> bool {
        let removed = match self.lobbies.get_mut(room_code) {
            Some(mut pending) => {
                let before = pending.len();
                pending.retain(|g| g.connection_id != connection_id);
                before != pending.len()
            },
            None => false,
        };
        self.lobbies.remove_if(room_code, |_, v| v.is_empty());
        removed
    }

    /// Re-notifies a newly promoted host of every knock still waiting,
    /// so pending guests survive a host change.
    pub fn reparent(&self, room_code: &str, new_host: ConnectionId) -> usize {
        let waiting: Vec<PendingGuest> = self
            .lobbies
            .get(room_code)
            .map(|pending| pending.clone())
            .unwrap_or_default();
        for guest in &waiting {
            self.notifier.send(
                new_host,
                ServerFrame::KnockRequest {
                    guest_id: guest.connection_id,
                    nickname: guest.nickname.clone(),
                },
            );
        }
        if !waiting.is_empty() {
            tracing::info!(room = %room_code, waiting = waiting.len(), "Pending knocks re-sent to new host");
        }
        waiting.len()
    }

    /// Tears down the lobby for a deleted room, returning whoever was
    /// still waiting so the caller can tell them.
    pub fn forget_room(&self, room_code: &str) -> Vec<PendingGuest> {
        self.lobbies
            .remove(room_code)
            .map(|(_, pending)| pending)
            .unwrap_or_default()
    }

    pub fn pending_count(&self, room_code: &str) -> usize {
        self.lobbies.get(room_code).map(|p| p.len()).unwrap_or(0)
    }
}
