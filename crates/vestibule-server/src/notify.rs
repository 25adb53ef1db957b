//! Delivery seam between the lifecycle stores and the transport.
//!
//! Stores and scheduled tasks never hold socket handles. They address
//! connections by id through [`Notifier`]; the WebSocket layer registers
//! each connection's outbound channel in a [`ConnectionRegistry`], which
//! is the production implementation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use vestibule_core::ConnectionId;
use vestibule_core::net::ServerFrame;

/// Outbound path to a connection, addressed by id.
pub trait Notifier: Send + Sync + 'static {
    /// Queues a frame for delivery. Unknown or already-closed
    /// connections are silently dropped.
    fn send(&self, to: ConnectionId, frame: ServerFrame);

    /// Drops the outbound channel, which closes the connection's writer.
    fn disconnect(&self, to: ConnectionId);
}

/// Maps live connections to their outbound frame channels.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    senders: Arc<DashMap<ConnectionId, mpsc::UnboundedSender<ServerFrame>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, tx: mpsc::UnboundedSender<ServerFrame>) {
        self.senders.insert(id, tx);
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.senders.remove(&id);
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.senders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Notifier for ConnectionRegistry {
    fn send(&self, to: ConnectionId, frame: ServerFrame) {
        if let Some(tx) = self.senders.get(&to) {
            // Receiver gone means the writer task already exited; the
            // close path will unregister shortly.
            let _ = tx.send(frame);
        }
    }

    fn disconnect(&self, to: ConnectionId) {
        self.senders.remove(&to);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every frame instead of delivering it.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(ConnectionId, ServerFrame)>>,
        pub disconnected: Mutex<Vec<ConnectionId>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn frames_for(&self, id: ConnectionId) -> Vec<ServerFrame> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, frame)| frame.clone())
                .collect()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, to: ConnectionId, frame: ServerFrame) {
            self.sent.lock().unwrap().push((to, frame));
        }

        fn disconnect(&self, to: ConnectionId) {
            self.disconnected.lock().unwrap().push(to);
        }
    }
}
