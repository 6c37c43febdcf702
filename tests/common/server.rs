//! Test backend lifecycle management
//!
//! Each test gets an isolated in-process backend on a random port. It serves
//! the notification and ticket REST routes plus a WebSocket broker, and
//! publishes a push on the recipient's topic whenever a ticket status changes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use repairdesk_notifier::broker::messages::{msg_types, payloads, ClientMessage, ServerMessage};
use repairdesk_notifier::{HttpBackend, Notification, NotificationId};

use super::constants::TEST_TOKEN;

type Outbox = mpsc::UnboundedSender<ServerMessage>;

#[derive(Default)]
struct BackendState {
    notifications: Mutex<HashMap<String, Vec<Notification>>>,
    ticket_owners: Mutex<HashMap<String, String>>,
    status_updates: Mutex<Vec<(String, String)>>,
    /// topic -> connection id -> outbox
    topics: Mutex<HashMap<String, HashMap<usize, Outbox>>>,
    fetch_count: AtomicUsize,
    subscribe_count: AtomicUsize,
    connection_count: AtomicUsize,
    next_connection_id: AtomicUsize,
    reject_websockets: Mutex<bool>,
    disconnect: Mutex<Option<broadcast::Sender<()>>>,
}

impl BackendState {
    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {}", TEST_TOKEN).as_str())
    }

    fn publish(&self, identity: &str) {
        let topic = format!("notifications/{}", identity);
        let message = ServerMessage::new(
            msg_types::MESSAGE,
            payloads::Delivery {
                topic: topic.clone(),
                body: json!({ "event": "ticket_status_changed" }),
            },
        );
        if let Some(subscribers) = self.topics.lock().unwrap().get(&topic) {
            for outbox in subscribers.values() {
                let _ = outbox.send(message.clone());
            }
        }
    }

    fn disconnect_receiver(&self) -> broadcast::Receiver<()> {
        let mut slot = self.disconnect.lock().unwrap();
        slot.get_or_insert_with(|| broadcast::channel(4).0).subscribe()
    }
}

/// Test backend instance
///
/// When dropped, the server shuts down.
pub struct TestBackend {
    /// Base URL for REST requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Broker WebSocket URL
    pub ws_url: String,

    state: Arc<BackendState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestBackend {
    /// Spawns a new backend on a random port
    pub async fn spawn() -> Self {
        let state = Arc::new(BackendState::default());

        let app = Router::new()
            .route(
                "/v1/notifications/user/{identity}",
                get(list_notifications).delete(delete_all),
            )
            .route(
                "/v1/notifications/user/{identity}/read-all",
                patch(mark_all_read),
            )
            .route("/v1/notifications/{id}/read", patch(mark_read))
            .route("/v1/notifications/{id}", delete(delete_one))
            .route("/v1/tickets/{ticket_id}/status", patch(update_status))
            .route("/v1/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            ws_url: format!("ws://127.0.0.1:{}/v1/ws", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// REST client pointed at this backend
    pub fn http_backend(&self) -> Arc<HttpBackend> {
        Arc::new(
            HttpBackend::new(self.base_url.clone(), Duration::from_secs(5))
                .expect("Failed to build HTTP backend"),
        )
    }

    /// Adds an unread notification for `identity`, returning its id
    pub fn seed_unread(&self, identity: &str, message: &str) -> NotificationId {
        self.insert(identity, message, None)
    }

    /// Adds an already-read notification for `identity`
    pub fn seed_read(&self, identity: &str, message: &str) -> NotificationId {
        let id = self.insert(identity, message, None);
        self.set_read(identity, &id);
        id
    }

    /// Routes status updates of `ticket_id` to `identity`'s notifications
    pub fn assign_ticket(&self, ticket_id: &str, identity: &str) {
        self.state
            .ticket_owners
            .lock()
            .unwrap()
            .insert(ticket_id.to_string(), identity.to_string());
    }

    /// Server-side list for `identity`
    pub fn notifications(&self, identity: &str) -> Vec<Notification> {
        self.state
            .notifications
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Publishes a push on `identity`'s topic without changing any data
    pub fn publish(&self, identity: &str) {
        self.state.publish(identity);
    }

    /// Closes every open broker connection
    pub fn force_disconnect(&self) {
        if let Some(tx) = self.state.disconnect.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }

    /// Makes the broker refuse (or accept again) WebSocket upgrades
    pub fn reject_websockets(&self, reject: bool) {
        *self.state.reject_websockets.lock().unwrap() = reject;
    }

    pub fn fetch_count(&self) -> usize {
        self.state.fetch_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.state.connection_count.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on `identity`'s topic
    pub fn subscribers(&self, identity: &str) -> usize {
        self.state
            .topics
            .lock()
            .unwrap()
            .get(&format!("notifications/{}", identity))
            .map(|subscribers| subscribers.values().filter(|o| !o.is_closed()).count())
            .unwrap_or(0)
    }

    /// (ticket id, status) pairs received so far
    pub fn status_updates(&self) -> Vec<(String, String)> {
        self.state.status_updates.lock().unwrap().clone()
    }

    fn insert(&self, identity: &str, message: &str, ticket: Option<&str>) -> NotificationId {
        insert_notification(&self.state, identity, message, ticket)
    }

    fn set_read(&self, identity: &str, id: &NotificationId) {
        if let Some(list) = self.state.notifications.lock().unwrap().get_mut(identity) {
            for n in list.iter_mut().filter(|n| &n.id == id) {
                n.is_read = true;
            }
        }
    }
}

fn insert_notification(
    state: &BackendState,
    identity: &str,
    message: &str,
    ticket: Option<&str>,
) -> NotificationId {
    let id = NotificationId::new(uuid::Uuid::new_v4().to_string());
    let notification = Notification {
        id: id.clone(),
        recipient_identity: identity.to_string(),
        message: message.to_string(),
        ticket_reference: ticket.map(str::to_string),
        created_at: Utc::now(),
        is_read: false,
    };
    // Newest first, the way the backend returns them.
    state
        .notifications
        .lock()
        .unwrap()
        .entry(identity.to_string())
        .or_default()
        .insert(0, notification);
    id
}

// ============================================================================
// REST handlers
// ============================================================================

async fn list_notifications(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> Response {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.fetch_count.fetch_add(1, Ordering::SeqCst);
    let list = state
        .notifications
        .lock()
        .unwrap()
        .get(&identity)
        .cloned()
        .unwrap_or_default();
    Json(list).into_response()
}

async fn mark_read(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut found = false;
    for list in state.notifications.lock().unwrap().values_mut() {
        for n in list.iter_mut().filter(|n| n.id.as_str() == id) {
            n.is_read = true;
            found = true;
        }
    }
    if found {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn mark_all_read(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> StatusCode {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if let Some(list) = state.notifications.lock().unwrap().get_mut(&identity) {
        for n in list.iter_mut() {
            n.is_read = true;
        }
    }
    StatusCode::NO_CONTENT
}

async fn delete_one(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let mut removed = false;
    for list in state.notifications.lock().unwrap().values_mut() {
        let before = list.len();
        list.retain(|n| n.id.as_str() != id);
        removed |= list.len() != before;
    }
    if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_all(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(identity): Path<String>,
) -> StatusCode {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    state.notifications.lock().unwrap().remove(&identity);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

async fn update_status(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> StatusCode {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let owner = state.ticket_owners.lock().unwrap().get(&ticket_id).cloned();
    let Some(owner) = owner else {
        return StatusCode::NOT_FOUND;
    };

    state
        .status_updates
        .lock()
        .unwrap()
        .push((ticket_id.clone(), body.status.clone()));
    insert_notification(
        &state,
        &owner,
        &format!("Ticket {} is now {}", ticket_id, body.status),
        Some(&ticket_id),
    );
    state.publish(&owner);
    StatusCode::NO_CONTENT
}

// ============================================================================
// Broker
// ============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<BackendState>>,
) -> Response {
    if !BackendState::authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if *state.reject_websockets.lock().unwrap() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum SocketEvent {
    Incoming(Option<Result<Message, axum::Error>>),
    Outgoing(ServerMessage),
    Disconnect,
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    let text = serde_json::to_string(message).expect("Failed to encode server message");
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    let connection_id = state.next_connection_id.fetch_add(1, Ordering::SeqCst);
    state.connection_count.fetch_add(1, Ordering::SeqCst);
    let (outbox, mut outgoing) = mpsc::unbounded_channel::<ServerMessage>();
    let mut disconnect = state.disconnect_receiver();

    if !send(&mut socket, &ServerMessage::new(msg_types::CONNECTED, json!({}))).await {
        return;
    }

    loop {
        let event = tokio::select! {
            incoming = socket.recv() => SocketEvent::Incoming(incoming),
            Some(message) = outgoing.recv() => SocketEvent::Outgoing(message),
            _ = disconnect.recv() => SocketEvent::Disconnect,
        };

        let reply = match event {
            SocketEvent::Incoming(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(request) => handle_client_message(&state, connection_id, &outbox, request),
                    Err(_) => None,
                }
            }
            SocketEvent::Incoming(Some(Ok(_))) => None,
            SocketEvent::Incoming(_) => break,
            SocketEvent::Outgoing(message) => Some(message),
            SocketEvent::Disconnect => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        };

        if let Some(reply) = reply {
            if !send(&mut socket, &reply).await {
                break;
            }
        }
    }

    for subscribers in state.topics.lock().unwrap().values_mut() {
        subscribers.remove(&connection_id);
    }
}

fn handle_client_message(
    state: &BackendState,
    connection_id: usize,
    outbox: &Outbox,
    request: ClientMessage,
) -> Option<ServerMessage> {
    match request.msg_type.as_str() {
        msg_types::SUBSCRIBE => {
            let topic: payloads::TopicRequest = serde_json::from_value(request.payload).ok()?;
            state.subscribe_count.fetch_add(1, Ordering::SeqCst);
            state
                .topics
                .lock()
                .unwrap()
                .entry(topic.topic)
                .or_default()
                .insert(connection_id, outbox.clone());
            None
        }
        msg_types::UNSUBSCRIBE => {
            let topic: payloads::TopicRequest = serde_json::from_value(request.payload).ok()?;
            if let Some(subscribers) = state.topics.lock().unwrap().get_mut(&topic.topic) {
                subscribers.remove(&connection_id);
            }
            None
        }
        msg_types::PING => Some(ServerMessage::new(msg_types::PONG, json!({}))),
        other => Some(ServerMessage::new(
            msg_types::ERROR,
            payloads::Error {
                code: "unknown_type".to_string(),
                message: format!("Unknown message type: {}", other),
            },
        )),
    }
}
