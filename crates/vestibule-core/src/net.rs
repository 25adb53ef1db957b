use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageKind};
use crate::room::RoomSnapshot;
use crate::{ConnectionId, UserId};

/// Maximum accepted frame size in bytes. Frames beyond this are dropped
/// before parsing.
pub const MAX_FRAME_SIZE: usize = 16 * 1024; // 16 KiB

/// Room settings as supplied by a client. The server clamps and hashes
/// before anything is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRoomSettings {
    /// Seconds each message lives; zero or absent means room-lifetime.
    #[serde(default)]
    pub message_ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub invite_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u8>,
}

/// Frames sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    CreateRoom {
        #[serde(default)]
        settings: CreateRoomSettings,
    },
    Knock {
        room_code: String,
        nickname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_token: Option<String>,
    },
    ApproveGuest {
        guest_id: ConnectionId,
        room_code: String,
    },
    DenyGuest {
        guest_id: ConnectionId,
        room_code: String,
    },
    JoinRoom {
        room_code: String,
        nickname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_token: Option<String>,
    },
    SendMessage {
        content: String,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default)]
        view_once: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipients: Option<Vec<UserId>>,
    },
    /// Explicit keep-alive; refreshes the inactivity clock and nothing else.
    UserActivity,
    LeaveRoom,
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    RoomCreated {
        room_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_token: Option<String>,
    },
    KnockPending,
    KnockApproved {
        is_host: bool,
    },
    KnockDenied {
        reason: String,
    },
    /// Delivered to the room's host when a guest knocks.
    KnockRequest {
        guest_id: ConnectionId,
        nickname: String,
    },
    JoinSuccess {
        room: RoomSnapshot,
        messages: Vec<Message>,
        nickname: String,
    },
    /// The supplied invite token belongs to a different room; the client
    /// should retry against `room_code`.
    JoinRedirect {
        room_code: String,
        requires_password: bool,
    },
    Error {
        code: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_seconds: Option<u64>,
    },
    Message {
        message: Message,
    },
    UserJoined {
        user_id: UserId,
        nickname: String,
    },
    UserLeft {
        user_id: UserId,
        nickname: String,
    },
    HostChanged {
        host_user_id: UserId,
        is_you: bool,
    },
    InactivityWarning {
        seconds_remaining: u64,
    },
    SessionTimeout,
    RoomClosed {
        reason: String,
    },
}

/// Frame parse failure.
#[derive(Debug)]
pub enum FrameError {
    Empty,
    TooLarge(usize),
    Malformed(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::TooLarge(size) => {
                write!(f, "frame too large: {size} bytes (max {MAX_FRAME_SIZE})")
            },
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse a client frame from raw WebSocket text.
pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, FrameError> {
    if raw.is_empty() {
        return Err(FrameError::Empty);
    }
    if raw.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(raw.len()));
    }
    serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))
}

/// Serialize a server frame to WebSocket text.
pub fn encode_server_frame(frame: &ServerFrame) -> String {
    // ServerFrame contains nothing that can fail to serialize.
    serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode server frame");
        r#"{"type":"error","code":"internal","reason":"encoding failure"}"#.to_string()
    })
}
