use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Why a lifecycle operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    RoomNotFound,
    RoomExpired,
    RoomFull,
    /// A field failed format validation before any state was touched.
    InvalidCredentialsFormat(String),
    /// Wrong or missing password. Carries the attempts left before
    /// lockout when a failure was recorded against the caller.
    InvalidPassword {
        remaining_attempts: Option<u32>,
    },
    InvalidOrExpiredToken,
    /// The token is real but belongs to another room; the caller should
    /// be routed there instead of failed.
    TokenRoomMismatch {
        redirect_room_code: String,
        requires_password: bool,
    },
    LockedOut {
        remaining_seconds: u64,
    },
    RateLimited {
        retry_after_seconds: u64,
    },
    LobbyFull,
    /// A host-only action came from a connection that is not the host.
    Unauthorized,
    /// Code space too saturated to allocate. Operational failure, not a
    /// user mistake.
    CodeGenerationExhausted,
}

impl RoomError {
    /// Stable machine-readable code for wire errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "room_not_found",
            Self::RoomExpired => "room_expired",
            Self::RoomFull => "room_full",
            Self::InvalidCredentialsFormat(_) => "invalid_credentials_format",
            Self::InvalidPassword { .. } => "invalid_password",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::TokenRoomMismatch { .. } => "token_room_mismatch",
            Self::LockedOut { .. } => "locked_out",
            Self::RateLimited { .. } => "rate_limited",
            Self::LobbyFull => "lobby_full",
            Self::Unauthorized => "unauthorized",
            Self::CodeGenerationExhausted => "code_generation_exhausted",
        }
    }

    /// Countdown data for errors the client can wait out.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::LockedOut { remaining_seconds } => Some(*remaining_seconds),
            Self::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomNotFound => write!(f, "Room not found"),
            Self::RoomExpired => write!(f, "Room has expired"),
            Self::RoomFull => write!(f, "Room is full"),
            Self::InvalidCredentialsFormat(detail) => write!(f, "Invalid input: {detail}"),
            Self::InvalidPassword {
                remaining_attempts: Some(n),
            } => write!(f, "Incorrect password, {n} attempts remaining"),
            Self::InvalidPassword {
                remaining_attempts: None,
            } => write!(f, "Incorrect password"),
            Self::InvalidOrExpiredToken => write!(f, "Invite link is invalid or has expired"),
            Self::TokenRoomMismatch {
                redirect_room_code, ..
            } => {
                write!(f, "Invite belongs to room {redirect_room_code}")
            },
            Self::LockedOut { remaining_seconds } => {
                write!(f, "Too many failed attempts, try again in {remaining_seconds}s")
            },
            Self::RateLimited {
                retry_after_seconds,
            } => {
                write!(f, "Sending too fast, wait {retry_after_seconds}s")
            },
            Self::LobbyFull => write!(f, "The waiting room is full, try again shortly"),
            Self::Unauthorized => write!(f, "Only the host can do that"),
            Self::CodeGenerationExhausted => write!(f, "Could not allocate a room code"),
        }
    }
}

impl std::error::Error for RoomError {}

/// REST-facing error with an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    TooManyRequests { reason: String, retry_after: u64 },
    Internal(String),
}

impl From<RoomError> for ApiError {
    fn from(err: RoomError) -> Self {
        let reason = err.to_string();
        match err {
            RoomError::RoomNotFound | RoomError::RoomExpired | RoomError::InvalidOrExpiredToken => {
                Self::NotFound(reason)
            },
            RoomError::RoomFull | RoomError::LobbyFull => Self::Conflict(reason),
            RoomError::InvalidCredentialsFormat(_) | RoomError::TokenRoomMismatch { .. } => {
                Self::BadRequest(reason)
            },
            RoomError::InvalidPassword { .. } | RoomError::Unauthorized => {
                Self::Unauthorized(reason)
            },
            RoomError::LockedOut { remaining_seconds } => Self::TooManyRequests {
                reason,
                retry_after: remaining_seconds,
            },
            RoomError::RateLimited {
                retry_after_seconds,
            } => Self::TooManyRequests {
                reason,
                retry_after: retry_after_seconds,
            },
            RoomError::CodeGenerationExhausted => Self::Internal(reason),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Conflict(m)
            | Self::Internal(m) => write!(f, "{m}"),
            Self::TooManyRequests { reason, .. } => write!(f, "{reason}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone(), None),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone(), None),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone(), None),
            Self::Conflict(m) => (StatusCode::CONFLICT, m.clone(), None),
            Self::TooManyRequests {
                reason,
                retry_after,
            } => (StatusCode::TOO_MANY_REQUESTS, reason.clone(), Some(*retry_after)),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone(), None),
        };
        let body = match retry_after {
            Some(secs) => serde_json::json!({ "error": message, "retry_after_seconds": secs }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
