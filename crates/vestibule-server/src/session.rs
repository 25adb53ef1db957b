//! Per-connection inactivity tracking.
//!
//! Each live session carries two scheduled tasks: a warning at
//! `timeout - warning_window` and a forced disconnect at `timeout`.
//! `touch` atomically replaces both, so a stale pair can never fire
//! after fresh activity. Timeout delivery to an already-gone connection
//! is silently dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use vestibule_core::net::ServerFrame;
use vestibule_core::{ConnectionId, time};

use crate::notify::Notifier;
use crate::scheduler::{Scheduler, TaskKind};

struct Session {
    room_code: String,
    last_activity_ms: u64,
    warned: bool,
}

pub struct SessionActivityTracker {
    sessions: Arc<DashMap<ConnectionId, Session>>,
    scheduler: Scheduler,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    warning_window: Duration,
}

impl SessionActivityTracker {
    pub fn new(
        timeout: Duration,
        warning_window: Duration,
        scheduler: Scheduler,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            scheduler,
            notifier,
            timeout,
            warning_window,
        }
    }

    /// Starts (or restarts) tracking for a connection that just joined
    /// `room_code`.
    pub fn register(&self, connection_id: ConnectionId, room_code: &str) {
        self.sessions.insert(
            connection_id,
            Session {
                room_code: room_code.to_string(),
                last_activity_ms: time::unix_millis(),
                warned: false,
            },
        );
        self.arm(connection_id);
    }

    /// Records activity and pushes both deadlines forward. Returns
    /// false for connections without a session.
    pub fn touch(&self, connection_id: ConnectionId) -> bool {
        let known = match self.sessions.get_mut(&connection_id) {
            Some(mut session) => {
                if session.warned {
                    tracing::debug!(connection = %connection_id, "Activity resumed after inactivity warning");
                }
                session.warned = false;
                session.last_activity_ms = session.last_activity_ms.max(time::unix_millis());
                true
            },
            None => false,
        };
        if known {
            self.arm(connection_id);
        }
        known
    }

    /// Stops tracking and cancels both pending tasks.
    pub fn clear(&self, connection_id: ConnectionId) {
        self.sessions.remove(&connection_id);
        let id = connection_id.to_string();
        self.scheduler.cancel(TaskKind::InactivityWarning, &id);
        self.scheduler.cancel(TaskKind::SessionTimeout, &id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn arm(&self, connection_id: ConnectionId) {
        let id = connection_id.to_string();
        let warning_delay = self.timeout.saturating_sub(self.warning_window);

        let sessions = Arc::clone(&self.sessions);
        let notifier = Arc::clone(&self.notifier);
        let seconds_remaining = self.warning_window.as_secs();
        self.scheduler.schedule(
            TaskKind::InactivityWarning,
            id.clone(),
            warning_delay,
            async move {
                let room = match sessions.get_mut(&connection_id) {
                    Some(mut session) => {
                        session.warned = true;
                        session.room_code.clone()
                    },
                    None => return,
                };
                tracing::debug!(connection = %connection_id, room = %room, "Inactivity warning");
                notifier.send(connection_id, ServerFrame::InactivityWarning { seconds_remaining });
            },
        );

        let sessions = Arc::clone(&self.sessions);
        let notifier = Arc::clone(&self.notifier);
        let scheduler = self.scheduler.clone();
        self.scheduler
            .schedule(TaskKind::SessionTimeout, id.clone(), self.timeout, async move {
                let Some((_, session)) = sessions.remove(&connection_id) else {
                    return;
                };
                tracing::info!(connection = %connection_id, room = %session.room_code, "Session timed out");
                scheduler.cancel(TaskKind::InactivityWarning, &id);
                notifier.send(connection_id, ServerFrame::SessionTimeout);
                notifier.disconnect(connection_id);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use uuid::Uuid;

    fn tracker(
        timeout_ms: u64,
        warning_ms: u64,
    ) -> (SessionActivityTracker, Arc<RecordingNotifier>) {
        let recorder = RecordingNotifier::new();
        let notifier = Arc::clone(&recorder) as Arc<dyn Notifier>;
        let tracker = SessionActivityTracker::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(warning_ms),
            Scheduler::new(),
            notifier,
        );
        (tracker, recorder)
    }

    #[tokio::test]
    async fn warns_then_times_out() {
        let (tracker, recorder) = tracker(200, 120);
        let conn = Uuid::new_v4();
        tracker.register(conn, "ABC234");

        tokio::time::sleep(Duration::from_millis(140)).await;
        let frames = recorder.frames_for(conn);
        assert!(
            frames.iter().any(|f| matches!(f, ServerFrame::InactivityWarning { .. })),
            "warning should fire before the timeout"
        );
        assert!(!frames.iter().any(|f| matches!(f, ServerFrame::SessionTimeout)));
        assert_eq!(tracker.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(160)).await;
        let frames = recorder.frames_for(conn);
        assert!(frames.iter().any(|f| matches!(f, ServerFrame::SessionTimeout)));
        assert_eq!(recorder.disconnected.lock().unwrap().as_slice(), &[conn]);
        assert_eq!(tracker.session_count(), 0);
    }

    #[tokio::test]
    async fn touch_defers_the_timeout() {
        let (tracker, recorder) = tracker(200, 120);
        let conn = Uuid::new_v4();
        tracker.register(conn, "ABC234");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tracker.touch(conn));

        // Well past the original deadline, but not the refreshed one.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tracker.session_count(), 1, "touched session must survive the old deadline");
        let frames = recorder.frames_for(conn);
        assert!(!frames.iter().any(|f| matches!(f, ServerFrame::SessionTimeout)));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tracker.session_count(), 0);
        let frames = recorder.frames_for(conn);
        assert!(frames.iter().any(|f| matches!(f, ServerFrame::SessionTimeout)));
    }

    #[tokio::test]
    async fn clear_cancels_both_tasks() {
        let (tracker, recorder) = tracker(100, 60);
        let conn = Uuid::new_v4();
        tracker.register(conn, "ABC234");
        tracker.clear(conn);

        tokio::time::sleep(Duration::from_millis(180)).await;
        assert_eq!(recorder.sent_count(), 0);
        assert!(recorder.disconnected.lock().unwrap().is_empty());
        assert_eq!(tracker.session_count(), 0);
    }

    #[tokio::test]
    async fn touch_without_session_is_false() {
        let (tracker, _) = tracker(100, 60);
        assert!(!tracker.touch(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn reregister_keeps_a_single_task_pair() {
        let (tracker, recorder) = tracker(60, 30);
        let conn = Uuid::new_v4();
        tracker.register(conn, "ABC234");
        tracker.register(conn, "ABC234");
        assert_eq!(tracker.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let timeouts = recorder
            .frames_for(conn)
            .iter()
            .filter(|f| matches!(f, ServerFrame::SessionTimeout))
            .count();
        assert_eq!(timeouts, 1, "re-registration must not double the timeout tasks");
    }

    #[tokio::test]
    async fn activity_timestamp_never_goes_backward() {
        let (tracker, _) = tracker(5_000, 1_000);
        let conn = Uuid::new_v4();
        tracker.register(conn, "ABC234");
        let first = tracker.sessions.get(&conn).unwrap().last_activity_ms;

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.touch(conn);
        let second = tracker.sessions.get(&conn).unwrap().last_activity_ms;
        assert!(second >= first);
    }
}
