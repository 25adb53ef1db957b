pub mod code;
pub mod message;
pub mod net;
pub mod room;
pub mod time;
pub mod token;

use uuid::Uuid;

/// Identifies one WebSocket connection for its entire lifetime.
pub type ConnectionId = Uuid;

/// Identifies an anonymous user. A reconnecting user gets a fresh id;
/// nothing ties two visits together.
pub type UserId = Uuid;
