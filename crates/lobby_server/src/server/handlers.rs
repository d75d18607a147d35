//! Connection handling logic for WebSocket clients.
//!
//! This module contains the per-client lifecycle: the WebSocket upgrade on
//! `/ws/{room_id}`, registration with the connection manager, relaying of
//! inbound frames and the cleanup when the client goes away.

use crate::{
    connection::{generate_connection_id, generate_player_id, ConnectionManager, ConnectionMetadata},
    error::{ManagerError, ServerError},
    messaging::{route_client_message, Envelope, Payload, PlayerPresenceContent},
};
use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    accept_hdr_async, WebSocketStream,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Message,
    },
};
use tracing::{debug, info, trace, warn};

const LOBBY_PATH_PREFIX: &str = "/ws/";
const DEFAULT_NICKNAME: &str = "Anonymous";

/// Extracts the room id and optional nickname from a request target.
///
/// Accepts `/ws/{room_id}` with an optional `nickname` query parameter.
/// Returns `None` for any other path or an empty room id.
pub fn parse_lobby_path(path: &str, query: Option<&str>) -> Option<(String, Option<String>)> {
    let room_id = path.strip_prefix(LOBBY_PATH_PREFIX)?;
    if room_id.is_empty() || room_id.contains('/') {
        return None;
    }

    let nickname = query.and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "nickname")
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    });

    Some((room_id.to_string(), nickname))
}

/// A client socket after a successful upgrade on `/ws/{room_id}`.
pub struct UpgradedClient {
    pub room_id: String,
    pub nickname: Option<String>,
    /// Outbound half, handed to the connection manager
    pub sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    /// Inbound half, read by the connection handler
    pub stream: SplitStream<WebSocketStream<TcpStream>>,
}

/// Performs the WebSocket handshake on `stream`.
///
/// Requests for any path other than `/ws/{room_id}` are answered with
/// `404 Not Found` and reported as [`ServerError::Handshake`].
pub async fn upgrade(stream: TcpStream) -> Result<UpgradedClient, ServerError> {
    let mut target = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        match parse_lobby_path(request.uri().path(), request.uri().query()) {
            Some(parsed) => {
                target = Some(parsed);
                Ok(response)
            }
            None => {
                let mut rejection = ErrorResponse::new(Some("Unknown lobby path".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    })
    .await
    .map_err(|e| ServerError::Handshake(format!("WebSocket handshake failed: {e}")))?;

    let Some((room_id, nickname)) = target else {
        return Err(ServerError::Handshake("No lobby path captured".to_string()));
    };

    let (sink, stream) = ws_stream.split();
    Ok(UpgradedClient {
        room_id,
        nickname,
        sink,
        stream,
    })
}

/// Handles a single client connection from upgrade to cleanup.
///
/// # Connection Flow
///
/// 1. Upgrade to WebSocket, rejecting paths other than `/ws/{room_id}`
/// 2. Register the connection with its metadata and join the room group
/// 3. Announce `player_join` to the rest of the room
/// 4. Route inbound text frames until either side closes or the read errors
/// 5. Announce `player_leave` and disconnect
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_manager: ConnectionManager,
) -> Result<(), ServerError> {
    let UpgradedClient {
        room_id,
        nickname,
        sink: ws_sender,
        stream: mut ws_receiver,
    } = upgrade(stream).await?;
    let nickname = nickname.unwrap_or_else(|| DEFAULT_NICKNAME.to_string());

    let connection_id = generate_connection_id();
    let player_id = generate_player_id();

    let metadata = ConnectionMetadata::new()
        .with("room_id", room_id.as_str())
        .with("nickname", nickname.as_str())
        .with("player_id", player_id.as_str())
        .with("remote_addr", addr.to_string());

    let connection = connection_manager
        .connect(connection_id.as_str(), ws_sender, metadata)
        .await?;
    if let Err(e) = connection_manager.join_group(&room_id, &connection_id).await {
        connection_manager.disconnect(&connection_id).await;
        return Err(e.into());
    }
    info!(conn_id = %connection_id, room_id = %room_id, nickname = %nickname, remote_addr = %addr, "🎮 Player joined lobby");

    let presence = |message: String| PlayerPresenceContent {
        player_id: player_id.clone(),
        nickname: nickname.clone(),
        message,
        ..Default::default()
    };

    let joined = Envelope::new(
        room_id.as_str(),
        Payload::PlayerJoin(presence(format!("{nickname} joined the room"))),
    )
    .with_sender(connection_id.as_str());
    if let Err(e) = connection_manager
        .send_to_group(&room_id, &joined, &[connection_id.as_str()])
        .await
    {
        warn!(conn_id = %connection_id, error = %e, "failed to announce player_join");
    }

    // A server-side close (disconnect, shutdown) also ends the read side so
    // the socket is not held open by an idle client.
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = connection.closed() => {
                debug!(conn_id = %connection_id, "connection closed by server");
                break;
            }
        };
        let Some(frame) = frame else { break };
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    route_client_message(&text, &connection_id, &room_id, &connection_manager).await
                {
                    trace!(conn_id = %connection_id, "❌ Message routing error: {}", e);
                }
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %connection_id, "🔌 Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id = %connection_id, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    let left = Envelope::new(
        room_id.as_str(),
        Payload::PlayerLeave(presence(format!("{nickname} left the room"))),
    )
    .with_sender(connection_id.as_str());
    match connection_manager
        .send_to_group(&room_id, &left, &[connection_id.as_str()])
        .await
    {
        Ok(_) | Err(ManagerError::GroupNotFound(_) | ManagerError::NotInitialized) => {}
        Err(e) => warn!(conn_id = %connection_id, error = %e, "failed to announce player_leave"),
    }

    connection_manager.disconnect(&connection_id).await;
    info!(conn_id = %connection_id, room_id = %room_id, "👋 Player left lobby");
    Ok(())
}
