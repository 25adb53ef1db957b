//! WebSocket transport: one task per connection.
//!
//! Frames are JSON text. Each connection gets an unbounded outbound
//! channel registered in the [`ConnectionRegistry`](crate::notify::ConnectionRegistry);
//! a writer task pumps it into the socket while the read loop feeds
//! client frames to the lifecycle. Dropping the channel (session
//! timeout, room expiry) closes the socket from the server side, and
//! every exit path funnels through the same cleanup.

use std::net::SocketAddr;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use vestibule_core::ConnectionId;
use vestibule_core::code::normalize_room_code;
use vestibule_core::net::{ClientFrame, ServerFrame, decode_client_frame, encode_server_frame};

use crate::error::RoomError;
use crate::lifecycle::RoomMember;
use crate::lobby::KnockOutcome;
use crate::notify::Notifier;
use crate::state::AppState;

/// Where a connection currently stands in the room lifecycle.
#[derive(Default)]
struct ConnState {
    member: Option<RoomMember>,
    pending_knock: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.registry.len();
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, peer)))
}

async fn handle_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let conn: ConnectionId = Uuid::new_v4();
    let peer_ip = peer.ip().to_string();
    let (tx, rx) = mpsc::unbounded_channel::<ServerFrame>();
    state.registry.register(conn, tx);
    tracing::debug!(connection = %conn, %peer, total = state.registry.len(), "WebSocket connected");

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, rx));

    let mut cs = ConnState::default();
    read_loop(&mut stream, &mut writer, &state, conn, &peer_ip, &mut cs).await;

    // Single cleanup path for client close, session timeout and room
    // expiry alike. leave_room and abandon_knock both tolerate already
    // handled connections.
    state.registry.unregister(conn);
    if let Some(code) = cs.pending_knock.take() {
        state.lifecycle.abandon_knock(&code, conn);
    }
    if let Some(member) = cs.member.take() {
        state.lifecycle.leave_room(&member.room_code, conn);
    }
    writer.abort();
    tracing::info!(connection = %conn, "WebSocket closed");
}

/// Pumps queued frames into the socket. When the lifecycle drops the
/// channel we still owe the client a proper close handshake.
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<ServerFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let encoded = encode_server_frame(&frame);
        if sink.send(WsMessage::Text(encoded.into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    writer: &mut JoinHandle<()>,
    state: &AppState,
    conn: ConnectionId,
    peer_ip: &str,
    cs: &mut ConnState,
) {
    loop {
        tokio::select! {
            // Writer gone means the server hung up (or the socket died
            // mid-send); stop reading.
            _ = &mut *writer => break,
            next = stream.next() => {
                let Some(Ok(msg)) = next else { break };
                match msg {
                    WsMessage::Text(text) => match decode_client_frame(&text) {
                        Ok(frame) => handle_frame(state, conn, peer_ip, cs, frame).await,
                        Err(err) => {
                            tracing::debug!(connection = %conn, error = %err, "Dropped unparseable frame");
                            protocol_error(state, conn, "malformed", &err.to_string());
                        },
                    },
                    WsMessage::Binary(_) => {
                        protocol_error(state, conn, "malformed", "binary frames are not supported");
                    },
                    WsMessage::Close(_) => break,
                    // axum answers pings on its own.
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {},
                }
            }
        }
    }
}

async fn handle_frame(
    state: &AppState,
    conn: ConnectionId,
    peer_ip: &str,
    cs: &mut ConnState,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::CreateRoom { settings } => {
            match state.lifecycle.create_room(peer_ip, settings).await {
                Ok(created) => state.registry.send(
                    conn,
                    ServerFrame::RoomCreated {
                        room_code: created.room_code,
                        invite_token: created.invite_token,
                    },
                ),
                Err(err) => send_error(state, conn, &err),
            }
        },
        ClientFrame::Knock {
            room_code,
            nickname,
            password,
            invite_token,
        } => {
            // Credentials are checked at join; the knock only carries
            // them so clients can send one payload for both steps.
            match state.lifecycle.knock(
                conn,
                &room_code,
                &nickname,
                password.as_deref(),
                invite_token.as_deref(),
            ) {
                Ok(KnockOutcome::Host) => {
                    cs.pending_knock = None;
                    state
                        .registry
                        .send(conn, ServerFrame::KnockApproved { is_host: true });
                },
                Ok(KnockOutcome::Pending) => {
                    cs.pending_knock = Some(normalize_room_code(&room_code));
                    state.registry.send(conn, ServerFrame::KnockPending);
                },
                Err(err) => state.registry.send(
                    conn,
                    ServerFrame::KnockDenied {
                        reason: err.to_string(),
                    },
                ),
            }
        },
        ClientFrame::ApproveGuest { guest_id, room_code } => {
            if let Err(err) = state.lifecycle.approve_guest(conn, &room_code, guest_id) {
                send_error(state, conn, &err);
            }
        },
        ClientFrame::DenyGuest { guest_id, room_code } => {
            if let Err(err) = state.lifecycle.deny_guest(conn, &room_code, guest_id) {
                send_error(state, conn, &err);
            }
        },
        ClientFrame::JoinRoom {
            room_code,
            nickname,
            password,
            invite_token,
        } => {
            let normalized = normalize_room_code(&room_code);
            // One room per connection: switching rooms leaves the old
            // one first so its lifecycle sees the departure.
            if let Some(current) = &cs.member
                && current.room_code != normalized
            {
                state.lifecycle.leave_room(&current.room_code, conn);
                cs.member = None;
            }
            match state
                .lifecycle
                .join_room(
                    conn,
                    peer_ip,
                    &room_code,
                    &nickname,
                    password.as_deref(),
                    invite_token.as_deref(),
                )
                .await
            {
                Ok(joined) => {
                    cs.pending_knock = None;
                    cs.member = Some(RoomMember {
                        room_code: normalized,
                        user_id: joined.user_id,
                        nickname: joined.nickname.clone(),
                    });
                    state.registry.send(
                        conn,
                        ServerFrame::JoinSuccess {
                            room: joined.snapshot,
                            messages: joined.messages,
                            nickname: joined.nickname,
                        },
                    );
                },
                Err(RoomError::TokenRoomMismatch {
                    redirect_room_code,
                    requires_password,
                }) => {
                    state.registry.send(
                        conn,
                        ServerFrame::JoinRedirect {
                            room_code: redirect_room_code,
                            requires_password,
                        },
                    );
                },
                Err(err) => send_error(state, conn, &err),
            }
        },
        ClientFrame::SendMessage {
            content,
            message_type,
            view_once,
            recipients,
        } => {
            let Some(member) = &cs.member else {
                protocol_error(state, conn, "not_in_room", "Join a room before sending messages");
                return;
            };
            // The sender's own copy arrives through the notifier with
            // everyone else's.
            if let Err(err) =
                state
                    .lifecycle
                    .send_message(conn, member, &content, message_type, view_once, recipients)
            {
                send_error(state, conn, &err);
            }
        },
        ClientFrame::UserActivity => {
            state.lifecycle.touch_activity(conn);
        },
        ClientFrame::LeaveRoom => {
            if let Some(member) = cs.member.take() {
                state.lifecycle.leave_room(&member.room_code, conn);
            }
            if let Some(code) = cs.pending_knock.take() {
                state.lifecycle.abandon_knock(&code, conn);
            }
        },
    }
}

fn send_error(state: &AppState, conn: ConnectionId, err: &RoomError) {
    state.registry.send(
        conn,
        ServerFrame::Error {
            code: err.code().to_string(),
            reason: err.to_string(),
            retry_after_seconds: err.retry_after_seconds(),
        },
    );
}

/// Transport-level errors that have no lifecycle counterpart.
fn protocol_error(state: &AppState, conn: ConnectionId, code: &str, reason: &str) {
    state.registry.send(
        conn,
        ServerFrame::Error {
            code: code.to_string(),
            reason: reason.to_string(),
            retry_after_seconds: None,
        },
    );
}
