//! Cross-store orchestration for the room lifecycle.
//!
//! The stores in this crate are isolated from each other: the room
//! store knows nothing about tokens, the token registry nothing about
//! sessions. Every operation that has to touch more than one of them
//! (a join that consumes a token, a leave that hands over the host
//! slot, an expiry that cascades) lives here.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use vestibule_core::message::{Message, MessageKind};
use vestibule_core::net::{CreateRoomSettings, ServerFrame};
use vestibule_core::room::{RoomSettings, RoomSnapshot, RoomUser};
use vestibule_core::{ConnectionId, UserId, time};

use crate::auth::{self, AuthGate};
use crate::config::ServerConfig;
use crate::error::RoomError;
use crate::invite::{InviteTokenRegistry, IssuedToken, TokenCheck};
use crate::lobby::{KnockOutcome, LobbyCoordinator, PendingGuest};
use crate::notify::Notifier;
use crate::rate_limit::RateLimiter;
use crate::room_store::{RoomMetadata, RoomStore};
use crate::scheduler::{Scheduler, TaskKind};
use crate::session::SessionActivityTracker;

/// Result of creating a room.
#[derive(Debug)]
pub struct CreatedRoom {
    pub room_code: String,
    /// Shareable permanent token, issued up front for invite-only rooms.
    pub invite_token: Option<String>,
}

/// What a freshly joined connection needs to render the room.
#[derive(Debug)]
pub struct JoinedRoom {
    pub user_id: UserId,
    pub nickname: String,
    pub rejoined: bool,
    pub snapshot: RoomSnapshot,
    pub messages: Vec<Message>,
}

/// Identity a connection carries once it is inside a room.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub room_code: String,
    pub user_id: UserId,
    pub nickname: String,
}

/// Resolution of an invite token into joinable room facts.
#[derive(Debug)]
pub struct InviteExchange {
    pub room_code: String,
    pub requires_password: bool,
}

/// Counters for the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleStats {
    pub rooms: usize,
    pub sessions: usize,
    pub invite_tokens: usize,
    pub scheduled_tasks: usize,
}

/// Ties the stores together and runs every cross-store cascade.
///
/// Cheap to clone; all fields are shared handles. Methods are safe to
/// call concurrently from any connection task, the stores do their own
/// per-key locking.
#[derive(Clone)]
pub struct RoomLifecycle {
    store: Arc<RoomStore>,
    invites: Arc<InviteTokenRegistry>,
    sessions: Arc<SessionActivityTracker>,
    lobby: Arc<LobbyCoordinator>,
    auth: Arc<AuthGate>,
    message_limiter: Arc<RateLimiter>,
    create_limiter: Arc<RateLimiter>,
    scheduler: Scheduler,
    notifier: Arc<dyn Notifier>,
    config: Arc<ServerConfig>,
}

impl RoomLifecycle {
    pub fn new(config: Arc<ServerConfig>, notifier: Arc<dyn Notifier>) -> Self {
        let scheduler = Scheduler::new();
        let sessions = Arc::new(SessionActivityTracker::new(
            config.session_timeout(),
            config.session_warning_window(),
            scheduler.clone(),
            Arc::clone(&notifier),
        ));
        Self {
            store: Arc::new(RoomStore::new(
                config.room_lifetime(),
                config.rooms.code_attempts,
            )),
            invites: Arc::new(InviteTokenRegistry::new(config.invite_ttl())),
            sessions,
            lobby: Arc::new(LobbyCoordinator::new(
                config.limits.lobby_size,
                Arc::clone(&notifier),
            )),
            auth: Arc::new(AuthGate::new(
                config.auth.max_failed_attempts,
                config.lockout(),
            )),
            message_limiter: Arc::new(RateLimiter::new(
                config.limits.messages_per_window,
                config.message_window(),
            )),
            create_limiter: Arc::new(RateLimiter::new(
                config.limits.creates_per_minute,
                Duration::from_secs(60),
            )),
            scheduler,
            notifier,
            config,
        }
    }

    /// Creates a room and arms its expiry task. Invite-only rooms get a
    /// shareable permanent token up front.
    pub async fn create_room(
        &self,
        peer: &str,
        settings: CreateRoomSettings,
    ) -> Result<CreatedRoom, RoomError> {
        if !self.create_limiter.allow(peer) {
            return Err(RoomError::RateLimited {
                retry_after_seconds: self.create_limiter.retry_after_seconds(peer),
            });
        }
        let cap = self.config.rooms.max_users_cap;
        let max_users = settings.max_users.unwrap_or(RoomSettings::default().max_users);
        if max_users < 2 || max_users > cap {
            return Err(RoomError::InvalidCredentialsFormat(format!(
                "max_users must be between 2 and {cap}"
            )));
        }
        if let Some(password) = &settings.password {
            auth::validate_password(password)?;
        }
        let password_hash = match &settings.password {
            Some(password) => Some(hash_off_thread(password).await),
            None => None,
        };

        let code = self.store.create(RoomSettings {
            message_ttl: Duration::from_secs(settings.message_ttl_seconds),
            password_hash,
            invite_only: settings.invite_only,
            max_users,
        })?;
        self.arm_room_expiry(&code);
        let invite_token = settings
            .invite_only
            .then(|| self.invites.issue(&code, true, None).token);
        Ok(CreatedRoom {
            room_code: code,
            invite_token,
        })
    }

    /// A guest asks to enter. Empty rooms auto-approve the knocker as
    /// prospective host; otherwise the current host is notified and the
    /// guest waits. Credentials are only format-checked here, the real
    /// verification happens at join.
    pub fn knock(
        &self,
        conn: ConnectionId,
        room_code: &str,
        nickname: &str,
        password: Option<&str>,
        invite_token: Option<&str>,
    ) -> Result<KnockOutcome, RoomError> {
        let code = auth::validate_room_code(room_code)?;
        let nickname = auth::validate_nickname(nickname)?;
        if let Some(password) = password {
            auth::validate_password(password)?;
        }
        if let Some(token) = invite_token {
            auth::validate_invite_token(token)?;
        }
        let view = self.store.auth_view(&code)?;
        self.lobby.knock(
            &code,
            PendingGuest {
                connection_id: conn,
                nickname,
            },
            view.host,
            view.member_count,
        )
    }

    /// Host lets a pending guest in. The guest still has to pass every
    /// join-time check; approval only clears the lobby gate.
    pub fn approve_guest(
        &self,
        caller: ConnectionId,
        room_code: &str,
        guest_id: ConnectionId,
    ) -> Result<(), RoomError> {
        let code = auth::validate_room_code(room_code)?;
        let view = self.store.auth_view(&code)?;
        if let Some(guest) = self.lobby.approve(&code, guest_id, caller, view.host)? {
            self.notifier
                .send(guest.connection_id, ServerFrame::KnockApproved { is_host: false });
        }
        Ok(())
    }

    pub fn deny_guest(
        &self,
        caller: ConnectionId,
        room_code: &str,
        guest_id: ConnectionId,
    ) -> Result<(), RoomError> {
        let code = auth::validate_room_code(room_code)?;
        let view = self.store.auth_view(&code)?;
        if let Some(guest) = self.lobby.deny(&code, guest_id, caller, view.host)? {
            self.notifier.send(
                guest.connection_id,
                ServerFrame::KnockDenied {
                    reason: "denied by host".to_string(),
                },
            );
        }
        Ok(())
    }

    /// Admits a connection into a room, re-validating everything against
    /// current state: lockout, password, invite token, capacity, expiry.
    /// The invite token is peeked before the join and consumed only
    /// after it succeeds, so a failed join never burns a token.
    pub async fn join_room(
        &self,
        conn: ConnectionId,
        peer: &str,
        room_code: &str,
        nickname: &str,
        password: Option<&str>,
        invite_token: Option<&str>,
    ) -> Result<JoinedRoom, RoomError> {
        let code = auth::validate_room_code(room_code)?;
        let nickname = auth::validate_nickname(nickname)?;
        if let Some(password) = password {
            auth::validate_password(password)?;
        }
        if let Some(token) = invite_token {
            auth::validate_invite_token(token)?;
        }

        let ident = auth::lockout_identifier(&code, peer);
        self.auth.check(&ident)?;

        let view = self.store.auth_view(&code)?;
        if view.requires_password {
            let Some(password) = password else {
                return Err(RoomError::InvalidPassword {
                    remaining_attempts: None,
                });
            };
            let stored = view.password_hash.as_deref().unwrap_or_default();
            if !verify_off_thread(password, stored).await {
                return Err(self.password_failed(&ident));
            }
            self.auth.clear(&ident);
        }

        let peeked = match invite_token {
            Some(token) => Some(self.invites.validate(token, Some(&code), false)?),
            None => None,
        };
        if let Some(TokenCheck::Redirect { room_code: target }) = &peeked {
            return Err(self.redirect_for(target));
        }
        let has_valid_token = matches!(peeked, Some(TokenCheck::Valid { .. }));

        let user = RoomUser {
            connection_id: conn,
            user_id: Uuid::new_v4(),
            nickname,
            joined_at: time::unix_millis(),
        };
        let accepted = self.store.join_user(&code, user, has_valid_token)?;

        if let Some(token) = invite_token
            && has_valid_token
            && !accepted.rejoined
        {
            match self.invites.validate(token, Some(&code), true) {
                Ok(TokenCheck::Valid {
                    permanent: false, ..
                }) => {
                    self.scheduler.cancel(TaskKind::InviteExpiry, token);
                },
                Ok(_) => {},
                Err(_) => {
                    // Lost the consume race to a parallel join. Undo ours.
                    if let Some(outcome) = self.store.leave(&code, conn)
                        && outcome.room_deleted
                    {
                        self.cleanup_room(&code);
                    }
                    return Err(RoomError::InvalidOrExpiredToken);
                },
            }
        }

        self.sessions.register(conn, &code);
        self.arm_room_expiry(&code);
        self.lobby.abandon(&code, conn);

        if !accepted.rejoined {
            for member in &accepted.members {
                if member.connection_id != conn {
                    self.notifier.send(
                        member.connection_id,
                        ServerFrame::UserJoined {
                            user_id: accepted.user.user_id,
                            nickname: accepted.user.nickname.clone(),
                        },
                    );
                }
            }
        }

        Ok(JoinedRoom {
            user_id: accepted.user.user_id,
            nickname: accepted.user.nickname,
            rejoined: accepted.rejoined,
            snapshot: accepted.snapshot,
            messages: accepted.messages,
        })
    }

    /// Posts a message: rate limit, sanitize, refresh the sender's
    /// session and the room deadline, deliver to every member allowed to
    /// see it.
    pub fn send_message(
        &self,
        conn: ConnectionId,
        member: &RoomMember,
        content: &str,
        kind: MessageKind,
        view_once: bool,
        recipients: Option<Vec<UserId>>,
    ) -> Result<Message, RoomError> {
        let key = conn.to_string();
        if !self.message_limiter.allow(&key) {
            return Err(RoomError::RateLimited {
                retry_after_seconds: self.message_limiter.retry_after_seconds(&key),
            });
        }
        let content = auth::sanitize_text(content, self.config.limits.max_message_length);
        if content.is_empty() {
            return Err(RoomError::InvalidCredentialsFormat(
                "message content is empty".to_string(),
            ));
        }
        self.sessions.touch(conn);

        let message = Message {
            id: Uuid::new_v4(),
            sender: member.user_id,
            sender_nickname: member.nickname.clone(),
            kind,
            content,
            sent_at: time::unix_millis(),
            expires_at: None,
            view_once,
            recipients,
        };
        let posted = self.store.add_message(&member.room_code, message)?;
        self.arm_room_expiry(&member.room_code);

        for m in &posted.members {
            if posted.message.visible_to(m.user_id) {
                self.notifier.send(
                    m.connection_id,
                    ServerFrame::Message {
                        message: posted.message.clone(),
                    },
                );
            }
        }
        Ok(posted.message)
    }

    /// Explicit keep-alive. Returns false for connections without a
    /// tracked session.
    pub fn touch_activity(&self, conn: ConnectionId) -> bool {
        self.sessions.touch(conn)
    }

    /// Removes a connection from a room and runs every cascade: session
    /// teardown, room deletion when it empties, host handover with
    /// re-parented knocks otherwise. Safe for connections that already
    /// left.
    pub fn leave_room(&self, room_code: &str, conn: ConnectionId) {
        self.sessions.clear(conn);
        self.message_limiter.forget(&conn.to_string());
        let Some(outcome) = self.store.leave(room_code, conn) else {
            return;
        };
        if outcome.room_deleted {
            self.cleanup_room(room_code);
            return;
        }

        for member in &outcome.members {
            self.notifier.send(
                member.connection_id,
                ServerFrame::UserLeft {
                    user_id: outcome.removed.user_id,
                    nickname: outcome.removed.nickname.clone(),
                },
            );
        }
        if let Some(new_host) = &outcome.new_host {
            tracing::info!(room = %room_code, host = %new_host.nickname, "Host handed over");
            for member in &outcome.members {
                self.notifier.send(
                    member.connection_id,
                    ServerFrame::HostChanged {
                        host_user_id: new_host.user_id,
                        is_you: member.connection_id == new_host.connection_id,
                    },
                );
            }
            let moved = self.lobby.reparent(room_code, new_host.connection_id);
            if moved > 0 {
                tracing::debug!(room = %room_code, pending = moved, "Outstanding knocks moved to new host");
            }
        }
    }

    /// Drops a pending knock for a connection that gave up or vanished.
    pub fn abandon_knock(&self, room_code: &str, conn: ConnectionId) {
        if self.lobby.abandon(room_code, conn) {
            tracing::debug!(room = %room_code, "Pending guest gone before a decision");
        }
    }

    /// Mints a single-use invite token for a room. Password-protected
    /// rooms require the password, with failures feeding the same
    /// lockout ledger as joins.
    pub async fn issue_invite(
        &self,
        peer: &str,
        room_code: &str,
        password: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, RoomError> {
        let code = auth::validate_room_code(room_code)?;
        if let Some(password) = password {
            auth::validate_password(password)?;
        }
        let view = self.store.auth_view(&code)?;
        if view.requires_password {
            let ident = auth::lockout_identifier(&code, peer);
            self.auth.check(&ident)?;
            let Some(password) = password else {
                return Err(RoomError::InvalidPassword {
                    remaining_attempts: None,
                });
            };
            let stored = view.password_hash.as_deref().unwrap_or_default();
            if !verify_off_thread(password, stored).await {
                return Err(self.password_failed(&ident));
            }
            self.auth.clear(&ident);
        }
        let issued = self.invites.issue(&code, false, ttl);
        self.schedule_token_expiry(&issued);
        Ok(issued)
    }

    /// Resolves a token into the facts a client needs to join. Never
    /// consumes; the token is spent by the join itself.
    pub fn exchange_invite(&self, token: &str) -> Result<InviteExchange, RoomError> {
        auth::validate_invite_token(token)?;
        let (TokenCheck::Valid { room_code, .. } | TokenCheck::Redirect { room_code }) =
            self.invites.validate(token, None, false)?;
        match self.store.metadata(&room_code) {
            Ok(meta) => Ok(InviteExchange {
                room_code,
                requires_password: meta.requires_password,
            }),
            Err(_) => {
                // The token outlived its room; it is garbage now.
                self.purge_room_tokens(&room_code);
                Err(RoomError::InvalidOrExpiredToken)
            },
        }
    }

    pub fn room_metadata(&self, room_code: &str) -> Result<RoomMetadata, RoomError> {
        let code = auth::validate_room_code(room_code)?;
        self.store.metadata(&code)
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            rooms: self.store.room_count(),
            sessions: self.sessions.session_count(),
            invite_tokens: self.invites.token_count(),
            scheduled_tasks: self.scheduler.pending(),
        }
    }

    /// Arms (or replaces) the expiry task to fire a full lifetime from
    /// now. Called on create and after every deadline refresh.
    fn arm_room_expiry(&self, room_code: &str) {
        let lifecycle = self.clone();
        let code = room_code.to_string();
        self.scheduler.schedule(
            TaskKind::RoomExpiry,
            room_code,
            self.store.lifetime(),
            async move { lifecycle.expire_room(&code) },
        );
    }

    /// Fired by the expiry task. The sweep re-checks the deadline, so a
    /// task that lost a race against a refresh does nothing.
    fn expire_room(&self, room_code: &str) {
        let Some(members) = self.store.sweep_expired(room_code) else {
            return;
        };
        self.cleanup_room(room_code);
        for user in members {
            self.notifier.send(
                user.connection_id,
                ServerFrame::RoomClosed {
                    reason: "room expired".to_string(),
                },
            );
            self.sessions.clear(user.connection_id);
            self.message_limiter.forget(&user.connection_id.to_string());
            self.notifier.disconnect(user.connection_id);
        }
    }

    /// Cross-store cascade once a room is gone from the store: expiry
    /// task, its tokens, its lockout ledger, its waiting guests.
    fn cleanup_room(&self, room_code: &str) {
        self.scheduler.cancel(TaskKind::RoomExpiry, room_code);
        self.purge_room_tokens(room_code);
        self.auth.purge_prefix(&format!("{room_code}:"));
        for guest in self.lobby.forget_room(room_code) {
            self.notifier.send(
                guest.connection_id,
                ServerFrame::KnockDenied {
                    reason: "room closed".to_string(),
                },
            );
        }
    }

    fn purge_room_tokens(&self, room_code: &str) {
        for token in self.invites.purge_room(room_code) {
            self.scheduler.cancel(TaskKind::InviteExpiry, &token);
        }
    }

    /// Records a failed password attempt, engaging the lockout at the
    /// threshold and scheduling its reset.
    fn password_failed(&self, ident: &str) -> RoomError {
        let status = self.auth.record_failure(ident);
        if status.locked {
            tracing::warn!(identifier = %ident, "Lockout engaged after repeated failures");
            self.schedule_lockout_reset(ident);
            RoomError::LockedOut {
                remaining_seconds: self.auth.lockout_duration().as_secs(),
            }
        } else {
            RoomError::InvalidPassword {
                remaining_attempts: Some(status.remaining_attempts),
            }
        }
    }

    fn schedule_lockout_reset(&self, ident: &str) {
        let gate = Arc::clone(&self.auth);
        let owned = ident.to_string();
        self.scheduler.schedule(
            TaskKind::LockoutReset,
            ident,
            self.auth.lockout_duration(),
            async move { gate.expire(&owned) },
        );
    }

    fn schedule_token_expiry(&self, issued: &IssuedToken) {
        if let Some(ttl) = issued.expires_in {
            let invites = Arc::clone(&self.invites);
            let token = issued.token.clone();
            self.scheduler.schedule(
                TaskKind::InviteExpiry,
                issued.token.clone(),
                ttl,
                async move {
                    invites.remove_if_expired(&token, time::unix_millis());
                },
            );
        }
    }

    /// Maps a mismatched token to redirect data for its real room, or
    /// reports it dead when that room no longer exists.
    fn redirect_for(&self, target: &str) -> RoomError {
        match self.store.metadata(target) {
            Ok(meta) => RoomError::TokenRoomMismatch {
                redirect_room_code: target.to_string(),
                requires_password: meta.requires_password,
            },
            Err(_) => {
                self.purge_room_tokens(target);
                RoomError::InvalidOrExpiredToken
            },
        }
    }
}

/// Password hashing is CPU-bound; it runs on the blocking pool, with an
/// inline fallback if the runtime is shutting down.
async fn hash_off_thread(password: &str) -> String {
    let owned = password.to_string();
    match tokio::task::spawn_blocking(move || auth::hash_password(&owned)).await {
        Ok(hash) => hash,
        Err(_) => auth::hash_password(password),
    }
}

async fn verify_off_thread(password: &str, stored: &str) -> bool {
    let password_owned = password.to_string();
    let stored_owned = stored.to_string();
    match tokio::task::spawn_blocking(move || {
        auth::verify_password(&password_owned, &stored_owned)
    })
    .await
    {
        Ok(ok) => ok,
        Err(_) => auth::verify_password(password, stored),
    }
}
