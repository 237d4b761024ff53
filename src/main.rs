//! Collab Coordinator - real-time collaboration rooms for a cloud editor
//!
//! A coordination server using:
//! - Axum with WebSocket for the per-connection transport
//! - JWT verification of every handshake
//! - In-memory project rooms (presence, last-write-wins file content,
//!   cursors, chat and typing indicators)
//! - JSON text protocol with camelCase fields

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::error::Elapsed;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

mod auth;
mod config;
mod room;
mod sync;

use anyhow::Context;
use auth::{ConnectionAuthenticator, Identity};
use config::ServerConfig;
use room::Mailbox;
use sync::{
    protocol::{WireProtocol, MAX_MESSAGE_SIZE},
    CollabServer,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Room coordinator
    server: Arc<CollabServer>,
    /// Handshake credential verifier
    authenticator: ConnectionAuthenticator,
    config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            server: Arc::new(CollabServer::new()),
            authenticator: ConnectionAuthenticator::new(&config.jwt_secret),
            config,
        }
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_rooms: usize,
    active_connections: usize,
}

#[derive(Debug, Serialize)]
struct RoomInfo {
    project_id: String,
    collaborator_count: usize,
    connection_count: usize,
    file_count: usize,
    created_at: i64,
}

#[derive(Debug, Serialize)]
struct RoomListResponse {
    rooms: Vec<RoomInfo>,
    total: usize,
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.server.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: stats.uptime_seconds,
        active_rooms: stats.active_rooms,
        active_connections: stats.active_connections,
    })
}

/// List live rooms
async fn list_rooms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut rooms: Vec<RoomInfo> = state
        .server
        .registry()
        .rooms()
        .into_iter()
        .map(|room| RoomInfo {
            project_id: room.project_id().to_string(),
            collaborator_count: room.collaborator_count(),
            connection_count: room.connection_count(),
            file_count: room.file_count(),
            created_at: room.created_at().timestamp(),
        })
        .collect();
    rooms.sort_by(|a, b| a.project_id.cmp(&b.project_id));

    let total = rooms.len();
    Json(RoomListResponse { rooms, total })
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

/// WebSocket upgrade handler. Origin and credential are checked before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| state.config.origin_allowed(o))
            .unwrap_or(false);
        if !allowed {
            warn!(origin = ?origin, "Rejected handshake from disallowed origin");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let token = auth::bearer_token(&headers, &params);
    let identity = match state.authenticator.authenticate(token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Rejected unauthenticated handshake");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    debug!(user_id = %identity.user_id, "WebSocket upgrade accepted");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, identity, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded outbound mailbox; rooms enqueue into it without blocking
    let (mailbox, mut rx, stalled) = Mailbox::channel();
    let mut conn = state.server.connect(identity, mailbox);
    let connection_id = conn.id;

    let heartbeat = state.config.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match WireProtocol::encode_server(&msg) {
                        Ok(text) => {
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(kind = msg.kind(), error = %e, "Failed to encode message");
                        }
                    }
                }
                _ = ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                _ = stalled.notified() => {
                    warn!(connection_id = %connection_id, "Client not keeping up, closing");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        debug!(connection_id = %connection_id, "Send task ended");
    });

    let idle_timeout = state.config.idle_timeout;
    loop {
        let next = tokio::select! {
            _ = &mut send_task => break,
            next = next_frame(&mut ws_receiver, idle_timeout) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(connection_id = %connection_id, "Connection idle, closing");
                break;
            }
        };

        let decoded = match frame {
            Message::Text(text) => WireProtocol::decode_client(&text),
            Message::Binary(data) => WireProtocol::decode_client_bytes(&data),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match decoded {
            Ok(msg) => state.server.handle_message(&mut conn, msg),
            Err(e) => warn!(connection_id = %connection_id, error = %e, "Failed to decode message"),
        }
    }

    state.server.disconnect(&mut conn);
    send_task.abort();
}

/// Next inbound frame, or `Elapsed` when the idle limit passes first
async fn next_frame(
    receiver: &mut SplitStream<WebSocket>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, axum::Error>>, Elapsed> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, receiver.next()).await,
        None => Ok(receiver.next().await),
    }
}

// ============================================================================
// ROUTER & MAIN
// ============================================================================

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let cors = if state.config.allows_any_origin() {
        cors.allow_origin(Any)
    } else {
        match HeaderValue::from_str(&state.config.allowed_origin) {
            Ok(origin) => cors.allow_origin(origin),
            Err(_) => {
                warn!(origin = %state.config.allowed_origin, "Allowed origin is not a valid header value");
                cors
            }
        }
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms", get(list_rooms))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_coordinator=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let addr = config.socket_addr();

    info!("Collab coordinator v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   WebSocket: ws://{}/ws", addr);
    info!("   Allowed origin: {}", config.allowed_origin);

    let state = Arc::new(AppState::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::{ClientMessage, ServerMessage};
    use axum::body::Body;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::net::SocketAddr;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    const SECRET: &str = "integration-test-secret";

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn token_for(user_id: &str) -> String {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600;
        let claims = serde_json::json!({
            "userId": user_id,
            "email": format!("{user_id}@example.com"),
            "exp": exp,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn spawn_server(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let app = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    /// Connect passing the credential in the query string
    async fn connect_with_query(addr: SocketAddr, user_id: &str) -> Client {
        let url = format!("ws://{addr}/ws?token={}", token_for(user_id));
        let (client, _) = connect_async(url).await.unwrap();
        client
    }

    /// Connect passing the credential in the Authorization header
    async fn connect_with_header(addr: SocketAddr, user_id: &str) -> Client {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", token_for(user_id)).parse().unwrap(),
        );
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    async fn send(client: &mut Client, msg: serde_json::Value) {
        client.send(WsMessage::Text(msg.to_string())).await.unwrap();
    }

    async fn recv(client: &mut Client) -> ServerMessage {
        loop {
            let frame = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return WireProtocol::decode_server(&text).unwrap();
            }
        }
    }

    async fn wait_until_no_rooms(state: &AppState) {
        for _ in 0..100 {
            if state.server.registry().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("rooms were not cleaned up");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(Arc::new(AppState::new(ServerConfig::new(SECRET))));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_rooms"], 0);
        assert_eq!(json["active_connections"], 0);
    }

    #[tokio::test]
    async fn test_rooms_endpoint_lists_live_rooms() {
        let state = Arc::new(AppState::new(ServerConfig::new(SECRET)));
        let (mailbox, _rx, _) = Mailbox::channel();
        let mut conn = state.server.connect(Identity::new("alice", "alice@example.com"), mailbox);
        state.server.handle_message(
            &mut conn,
            ClientMessage::JoinRoom {
                project_id: "proj-1".to_string(),
            },
        );

        let response = build_router(state.clone())
            .oneshot(Request::builder().uri("/api/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["total"], 1);
        assert_eq!(json["rooms"][0]["project_id"], "proj-1");
        assert_eq!(json["rooms"][0]["collaborator_count"], 1);
        assert_eq!(json["rooms"][0]["connection_count"], 1);
    }

    #[tokio::test]
    async fn test_ws_requires_credential() {
        let (addr, state) = spawn_server(ServerConfig::new(SECRET)).await;

        let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
        match err {
            tungstenite::Error::Http(response) => {
                assert_eq!(response.status().as_u16(), 401)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = connect_async(format!("ws://{addr}/ws?token=not-a-jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, tungstenite::Error::Http(r) if r.status().as_u16() == 401));

        assert_eq!(state.server.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_ws_rejects_foreign_origin() {
        let (addr, _state) = spawn_server(ServerConfig::new(SECRET)).await;

        let mut request = format!("ws://{addr}/ws?token={}", token_for("alice"))
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Origin", "http://evil.example".parse().unwrap());

        let err = connect_async(request).await.unwrap_err();
        assert!(matches!(err, tungstenite::Error::Http(r) if r.status().as_u16() == 403));
    }

    #[tokio::test]
    async fn test_ws_collaboration_session() {
        let (addr, state) = spawn_server(ServerConfig::new(SECRET)).await;

        let mut alice = connect_with_query(addr, "alice").await;
        send(&mut alice, serde_json::json!({"type": "join-room", "projectId": "p"})).await;
        match recv(&mut alice).await {
            ServerMessage::CollaboratorsUpdated { collaborators } => {
                assert_eq!(collaborators.len(), 1);
                assert_eq!(collaborators[0].id, "alice");
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        let mut bob = connect_with_header(addr, "bob").await;
        send(&mut bob, serde_json::json!({"type": "join-room", "projectId": "p"})).await;
        match recv(&mut bob).await {
            ServerMessage::CollaboratorsUpdated { collaborators } => {
                assert_eq!(collaborators.len(), 2)
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert_eq!(
            recv(&mut alice).await,
            ServerMessage::UserJoined {
                user_id: "bob".to_string(),
                email: "bob@example.com".to_string(),
            }
        );

        send(
            &mut alice,
            serde_json::json!({"type": "file-update", "fileId": "main.rs", "content": "fn main() {}"}),
        )
        .await;
        match recv(&mut bob).await {
            ServerMessage::FileUpdated {
                file_id,
                content,
                user_id,
                ..
            } => {
                assert_eq!(file_id, "main.rs");
                assert_eq!(content, "fn main() {}");
                assert_eq!(user_id, "alice");
            }
            other => panic!("expected file-updated, got {:?}", other),
        }

        send(&mut bob, serde_json::json!({"type": "chat-message", "content": "nice @alice"})).await;
        for client in [&mut alice, &mut bob] {
            match recv(client).await {
                ServerMessage::ChatMessage(msg) => {
                    assert_eq!(msg.sender_id, "bob");
                    assert_eq!(msg.mentions, vec!["alice"]);
                }
                other => panic!("expected chat-message, got {:?}", other),
            }
        }

        send(&mut alice, serde_json::json!({"type": "ping", "timestamp": 7})).await;
        assert!(matches!(recv(&mut alice).await, ServerMessage::Pong { timestamp: 7, .. }));

        bob.close(None).await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            ServerMessage::UserLeft {
                user_id: "bob".to_string(),
                email: "bob@example.com".to_string(),
            }
        );
        assert!(state.server.registry().contains("p"));

        alice.close(None).await.unwrap();
        wait_until_no_rooms(&state).await;
    }

    #[tokio::test]
    async fn test_ws_garbage_frame_is_ignored() {
        let (addr, _state) = spawn_server(ServerConfig::new(SECRET)).await;

        let mut alice = connect_with_query(addr, "alice").await;
        alice.send(WsMessage::Text("{not json".to_string())).await.unwrap();
        send(&mut alice, serde_json::json!({"type": "unknown-kind"})).await;

        // Connection still serves requests afterwards
        send(&mut alice, serde_json::json!({"type": "ping", "timestamp": 1})).await;
        assert!(matches!(recv(&mut alice).await, ServerMessage::Pong { timestamp: 1, .. }));
    }

    #[tokio::test]
    async fn test_ws_idle_connection_is_dropped() {
        let mut config = ServerConfig::new(SECRET);
        config.idle_timeout = Some(Duration::from_millis(300));
        let (addr, state) = spawn_server(config).await;

        let mut alice = connect_with_query(addr, "alice").await;
        send(&mut alice, serde_json::json!({"type": "join-room", "projectId": "idle"})).await;
        recv(&mut alice).await;
        assert!(state.server.registry().contains("idle"));

        // Stay silent until the server gives up on us
        wait_until_no_rooms(&state).await;
        assert_eq!(state.server.stats().active_connections, 0);
    }
}
