//! REST surface: room creation and invite links.
//!
//! Everything here is also reachable over the WebSocket protocol; the
//! REST routes exist so share links can be minted and resolved without
//! holding a socket open.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use vestibule_core::net::CreateRoomSettings;

use crate::error::{ApiError, RoomError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
}

/// POST /api/v1/rooms: create a room.
pub async fn create_room(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(settings): Json<CreateRoomSettings>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), ApiError> {
    let created = state
        .lifecycle
        .create_room(&peer.ip().to_string(), settings)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_code: created.room_code,
            invite_token: created.invite_token,
        }),
    ))
}

/// Room facts for the join screen. Unknown and expired rooms answer the
/// same way so past codes cannot be probed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RoomInfoResponse {
    Missing {
        exists: bool,
    },
    Present {
        exists: bool,
        requires_password: bool,
        invite_only: bool,
        user_count: usize,
        max_users: u8,
        expires_in_seconds: u64,
    },
}

/// GET /api/v1/rooms/{code}: public room facts.
pub async fn room_info(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomInfoResponse>, ApiError> {
    match state.lifecycle.room_metadata(&code) {
        Ok(meta) => Ok(Json(RoomInfoResponse::Present {
            exists: true,
            requires_password: meta.requires_password,
            invite_only: meta.invite_only,
            user_count: meta.user_count,
            max_users: meta.max_users,
            expires_in_seconds: meta.expires_in_seconds,
        })),
        Err(RoomError::RoomNotFound | RoomError::RoomExpired) => {
            Ok(Json(RoomInfoResponse::Missing { exists: false }))
        },
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueInviteBody {
    #[serde(default)]
    pub password: Option<String>,
    /// Token lifetime in seconds; the server default applies when absent.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct IssueInviteResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

/// POST /api/v1/rooms/{code}/invites: mint a single-use invite token.
/// Password-protected rooms require the room password in the body.
pub async fn issue_invite(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Json(body): Json<IssueInviteBody>,
) -> Result<(StatusCode, Json<IssueInviteResponse>), ApiError> {
    if body.ttl_seconds == Some(0) {
        return Err(ApiError::BadRequest(
            "ttl_seconds must be positive".to_string(),
        ));
    }
    let ttl = body.ttl_seconds.map(Duration::from_secs);
    let issued = state
        .lifecycle
        .issue_invite(&peer.ip().to_string(), &code, body.password.as_deref(), ttl)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IssueInviteResponse {
            token: issued.token,
            expires_in_seconds: issued.expires_in.map(|d| d.as_secs()),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInviteBody {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeInviteResponse {
    pub room_code: String,
    pub requires_password: bool,
}

/// POST /api/v1/invites/exchange: resolve an invite token to its room.
/// Resolution never consumes the token; joining does.
pub async fn exchange_invite(
    State(state): State<AppState>,
    Json(body): Json<ExchangeInviteBody>,
) -> Result<Json<ExchangeInviteResponse>, ApiError> {
    let exchange = state.lifecycle.exchange_invite(&body.token)?;
    Ok(Json(ExchangeInviteResponse {
        room_code: exchange.room_code,
        requires_password: exchange.requires_password,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000)))
    }

    fn state() -> AppState {
        AppState::new(ServerConfig::default())
    }

    #[tokio::test]
    async fn create_room_returns_code() {
        let state = state();
        let result = create_room(State(state), peer(), Json(CreateRoomSettings::default())).await;
        let (status, json) = result.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json.room_code.len(), 6);
        assert!(json.invite_token.is_none());
    }

    #[tokio::test]
    async fn create_invite_only_room_includes_token() {
        let state = state();
        let settings = CreateRoomSettings {
            invite_only: true,
            ..CreateRoomSettings::default()
        };
        let (_, json) = create_room(State(state), peer(), Json(settings)).await.unwrap();
        let token = json.invite_token.clone().expect("invite-only rooms ship a token");
        assert_eq!(token.len(), 32);
    }

    #[tokio::test]
    async fn create_room_rejects_bad_settings() {
        let state = state();
        let settings = CreateRoomSettings {
            max_users: Some(1),
            ..CreateRoomSettings::default()
        };
        let err = create_room(State(state), peer(), Json(settings)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn room_info_does_not_reveal_dead_codes() {
        let state = state();
        let result = room_info(State(state), Path("ZZZZZZ".to_string())).await;
        assert!(matches!(
            result.unwrap(),
            Json(RoomInfoResponse::Missing { exists: false })
        ));
    }

    #[tokio::test]
    async fn room_info_rejects_malformed_codes() {
        let state = state();
        let err = room_info(State(state), Path("a!".to_string())).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn room_info_reports_live_room() {
        let state = state();
        let settings = CreateRoomSettings {
            password: Some("sesame22".to_string()),
            max_users: Some(4),
            ..CreateRoomSettings::default()
        };
        let (_, created) = create_room(State(state.clone()), peer(), Json(settings))
            .await
            .unwrap();

        let Json(info) = room_info(State(state), Path(created.room_code.clone()))
            .await
            .unwrap();
        match info {
            RoomInfoResponse::Present {
                exists,
                requires_password,
                invite_only,
                user_count,
                max_users,
                expires_in_seconds,
            } => {
                assert!(exists);
                assert!(requires_password);
                assert!(!invite_only);
                assert_eq!(user_count, 0);
                assert_eq!(max_users, 4);
                assert!(expires_in_seconds > 0);
            },
            RoomInfoResponse::Missing { .. } => panic!("room should exist"),
        }
    }

    #[tokio::test]
    async fn issue_and_exchange_roundtrip() {
        let state = state();
        let (_, created) = create_room(
            State(state.clone()),
            peer(),
            Json(CreateRoomSettings::default()),
        )
        .await
        .unwrap();

        let (status, issued) = issue_invite(
            State(state.clone()),
            peer(),
            Path(created.room_code.clone()),
            Json(IssueInviteBody::default()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(issued.expires_in_seconds.is_some());

        let Json(exchange) = exchange_invite(
            State(state),
            Json(ExchangeInviteBody {
                token: issued.token.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(exchange.room_code, created.room_code);
        assert!(!exchange.requires_password);
    }

    #[tokio::test]
    async fn issue_invite_requires_password_when_room_is_protected() {
        let state = state();
        let settings = CreateRoomSettings {
            password: Some("sesame22".to_string()),
            ..CreateRoomSettings::default()
        };
        let (_, created) = create_room(State(state.clone()), peer(), Json(settings))
            .await
            .unwrap();

        let err = issue_invite(
            State(state.clone()),
            peer(),
            Path(created.room_code.clone()),
            Json(IssueInviteBody::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let body = IssueInviteBody {
            password: Some("sesame22".to_string()),
            ttl_seconds: Some(600),
        };
        let (_, issued) = issue_invite(
            State(state),
            peer(),
            Path(created.room_code.clone()),
            Json(body),
        )
        .await
        .unwrap();
        assert_eq!(issued.expires_in_seconds, Some(600));
    }

    #[tokio::test]
    async fn issue_invite_rejects_zero_ttl() {
        let state = state();
        let (_, created) = create_room(
            State(state.clone()),
            peer(),
            Json(CreateRoomSettings::default()),
        )
        .await
        .unwrap();

        let body = IssueInviteBody {
            password: None,
            ttl_seconds: Some(0),
        };
        let err = issue_invite(State(state), peer(), Path(created.room_code.clone()), Json(body))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn exchange_unknown_token_is_not_found() {
        let state = state();
        let err = exchange_invite(
            State(state),
            Json(ExchangeInviteBody {
                token: "0123456789abcdef0123456789abcdef".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
