use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use vestibule_core::net::{ClientFrame, CreateRoomSettings, ServerFrame};
use vestibule_server::build_app;
use vestibule_server::config::ServerConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _server: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn send_frame(stream: &mut WsStream, frame: &ClientFrame) {
    let encoded = serde_json::to_string(frame).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

/// Read the next server frame (5s timeout).
pub async fn read_frame(stream: &mut WsStream) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for a server frame")
}

/// Try to read a frame, returning None on timeout.
pub async fn try_read_frame(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerFrame> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read frames until one matches, discarding the rest.
pub async fn read_until<F>(stream: &mut WsStream, mut matches: F) -> ServerFrame
where
    F: FnMut(&ServerFrame) -> bool,
{
    loop {
        let frame = read_frame(stream).await;
        if matches(&frame) {
            return frame;
        }
    }
}

/// Wait for the server to close the socket, skipping queued frames.
pub async fn expect_close(stream: &mut WsStream) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for the server to close the socket")
}

/// Create a room over the socket. Returns (room_code, invite_token).
pub async fn create_room(
    stream: &mut WsStream,
    settings: CreateRoomSettings,
) -> (String, Option<String>) {
    send_frame(stream, &ClientFrame::CreateRoom { settings }).await;
    match read_frame(stream).await {
        ServerFrame::RoomCreated {
            room_code,
            invite_token,
        } => (room_code, invite_token),
        other => panic!("Expected RoomCreated, got: {other:?}"),
    }
}

/// First entry into a fresh room: knock (auto-approved as host), then
/// join. Panics unless both steps succeed.
pub async fn enter_as_host(stream: &mut WsStream, room_code: &str, nickname: &str) {
    send_frame(
        stream,
        &ClientFrame::Knock {
            room_code: room_code.to_string(),
            nickname: nickname.to_string(),
            password: None,
            invite_token: None,
        },
    )
    .await;
    match read_frame(stream).await {
        ServerFrame::KnockApproved { is_host: true } => {},
        other => panic!("Expected host auto-approval, got: {other:?}"),
    }

    send_frame(
        stream,
        &ClientFrame::JoinRoom {
            room_code: room_code.to_string(),
            nickname: nickname.to_string(),
            password: None,
            invite_token: None,
        },
    )
    .await;
    match read_frame(stream).await {
        ServerFrame::JoinSuccess { .. } => {},
        other => panic!("Expected JoinSuccess, got: {other:?}"),
    }
}
