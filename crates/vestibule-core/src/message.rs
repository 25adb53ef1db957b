use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Identifies a message within its room.
pub type MessageId = Uuid;

/// Payload discriminator for chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    System,
}

/// A message stored inside a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub sender_nickname: String,
    pub kind: MessageKind,
    pub content: String,
    /// Unix millis.
    pub sent_at: u64,
    /// Unix millis; `None` means the message lives as long as the room.
    pub expires_at: Option<u64>,
    /// View-once messages are delivered to whoever is present and never
    /// stored, so they cannot surface in a later join's backlog.
    #[serde(default)]
    pub view_once: bool,
    /// `None` means visible to the whole room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<UserId>>,
}

impl Message {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|at| now_millis >= at)
    }

    /// Whether `user` is allowed to see this message.
    pub fn visible_to(&self, user: UserId) -> bool {
        match &self.recipients {
            None => true,
            Some(list) => self.sender == user || list.contains(&user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(expires_at: Option<u64>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: Uuid::new_v4(),
            sender_nickname: "ghost".to_string(),
            kind: MessageKind::Text,
            content: "hello".to_string(),
            sent_at: 1_000,
            expires_at,
            view_once: false,
            recipients: None,
        }
    }

    #[test]
    fn no_ttl_never_expires() {
        let msg = make_message(None);
        assert!(!msg.is_expired(u64::MAX));
    }

    #[test]
    fn expires_at_boundary() {
        let msg = make_message(Some(2_000));
        assert!(!msg.is_expired(1_999));
        assert!(msg.is_expired(2_000));
        assert!(msg.is_expired(2_001));
    }

    #[test]
    fn broadcast_visible_to_everyone() {
        let msg = make_message(None);
        assert!(msg.visible_to(Uuid::new_v4()));
    }

    #[test]
    fn targeted_visible_to_recipients_and_sender() {
        let recipient = Uuid::new_v4();
        let mut msg = make_message(None);
        msg.recipients = Some(vec![recipient]);
        assert!(msg.visible_to(recipient));
        assert!(msg.visible_to(msg.sender));
        assert!(!msg.visible_to(Uuid::new_v4()));
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Text).unwrap(),
            "\"text\""
        );
        assert_eq!(
            serde_json::to_string(&MessageKind::System).unwrap(),
            "\"system\""
        );
    }
}
