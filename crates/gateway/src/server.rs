// Presenti WebSocket Server
//
// One task per connection, driven by a select! loop over the inbound
// socket and a per-connection outbound channel. All connection metadata
// (scope, capability flags, subscriptions) lives in SocketState so
// handlers and the broadcast path share one view.

use crate::handlers::{dispatch_frame, DispatchAction, HandlerTable};
use crate::protocol::{Envelope, PayloadType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use presenti_core::{PresenceLedger, Scope, TokenValidator};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Connection identifier. Doubles as the ledger entry key for presence
/// written over this connection.
pub type ConnId = Uuid;

/// Source of the fully-composed payload pushed to subscribers. The
/// service layer implements this over the supervisor tree.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn payload_for(&self, scope: &Scope) -> JsonValue;
}

struct ConnectionEntry {
    scope: Option<Scope>,
    authenticated: bool,
    first_party: bool,
    alive: bool,
    outbound: mpsc::UnboundedSender<String>,
}

/// Shared state behind every connection task.
pub struct SocketState {
    validator: Arc<dyn TokenValidator>,
    ledger: Arc<PresenceLedger>,
    payloads: Arc<dyn PayloadSource>,
    connections: Mutex<HashMap<ConnId, ConnectionEntry>>,
    subscriptions: Mutex<HashMap<Scope, HashSet<ConnId>>>,
    handlers: HandlerTable,
}

impl SocketState {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        ledger: Arc<PresenceLedger>,
        payloads: Arc<dyn PayloadSource>,
    ) -> Self {
        Self {
            validator,
            ledger,
            payloads,
            connections: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            handlers: HandlerTable::standard(),
        }
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn validator(&self) -> &Arc<dyn TokenValidator> {
        &self.validator
    }

    pub fn ledger(&self) -> &Arc<PresenceLedger> {
        &self.ledger
    }

    pub fn payloads(&self) -> &Arc<dyn PayloadSource> {
        &self.payloads
    }

    /// Track a new connection and hand back the receiving half of its
    /// outbound channel.
    pub async fn register_connection(&self) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().await.insert(
            conn,
            ConnectionEntry {
                scope: None,
                authenticated: false,
                first_party: false,
                alive: true,
                outbound: tx,
            },
        );
        (conn, rx)
    }

    /// Mark the connection authenticated under `scope`. First-party
    /// capability follows directly from the scope the token resolved to.
    pub async fn authenticate(&self, conn: ConnId, scope: Scope) {
        let mut connections = self.connections.lock().await;
        let entry = connections
            .get_mut(&conn)
            .expect("socket connection used after close");
        entry.first_party = scope.is_first_party();
        entry.scope = Some(scope);
        entry.authenticated = true;
    }

    pub async fn connection_flags(&self, conn: ConnId) -> (bool, bool) {
        let connections = self.connections.lock().await;
        let entry = connections
            .get(&conn)
            .expect("socket connection used after close");
        (entry.authenticated, entry.first_party)
    }

    pub async fn connection_scope(&self, conn: ConnId) -> Option<Scope> {
        let connections = self.connections.lock().await;
        connections.get(&conn).and_then(|e| e.scope.clone())
    }

    /// Queue an outbound envelope for one connection.
    pub async fn send(&self, conn: ConnId, payload_type: PayloadType, data: JsonValue) {
        let connections = self.connections.lock().await;
        let entry = connections
            .get(&conn)
            .expect("socket connection used after close");
        assert!(entry.alive, "socket connection used after close");
        // The receiving half lives in the connection task; a send failure
        // just means the task is mid-teardown.
        let _ = entry.outbound.send(Envelope::new(payload_type, data).to_frame());
    }

    pub async fn subscribe(&self, scope: &Scope, conn: ConnId) {
        self.subscriptions
            .lock()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(conn);
    }

    pub async fn unsubscribe(&self, scope: &Scope, conn: ConnId) {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(set) = subscriptions.get_mut(scope) {
            set.remove(&conn);
            if set.is_empty() {
                subscriptions.remove(scope);
            }
        }
    }

    /// Push a scope's composed payload to every subscriber.
    pub async fn broadcast(&self, scope: &Scope, payload: JsonValue) {
        let subscribers: Vec<ConnId> = {
            let subscriptions = self.subscriptions.lock().await;
            match subscriptions.get(scope) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        };

        let frame =
            Envelope::new(PayloadType::Presence, json!({ "scope": scope, "payload": payload }))
                .to_frame();
        let connections = self.connections.lock().await;
        for conn in subscribers {
            if let Some(entry) = connections.get(&conn) {
                let _ = entry.outbound.send(frame.clone());
            }
        }
    }

    pub async fn subscriber_count(&self, scope: &Scope) -> usize {
        self.subscriptions
            .lock()
            .await
            .get(scope)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Drop all state for a closed connection: its metadata, its
    /// subscriptions, and every presence it wrote into the ledger.
    pub async fn teardown_connection(&self, conn: ConnId) {
        if let Some(entry) = self.connections.lock().await.get_mut(&conn) {
            entry.alive = false;
        }

        {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.retain(|_, set| {
                set.remove(&conn);
                !set.is_empty()
            });
        }

        self.ledger.remove_entry(&conn.to_string());
        self.connections.lock().await.remove(&conn);
    }
}

/// Accept loop plus connection task spawning.
#[derive(Clone)]
pub struct SocketServer {
    state: Arc<SocketState>,
    ws_path: String,
}

impl SocketServer {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        ledger: Arc<PresenceLedger>,
        payloads: Arc<dyn PayloadSource>,
        ws_path: &str,
    ) -> Self {
        Self {
            state: Arc::new(SocketState::new(validator, ledger, payloads)),
            ws_path: ws_path.to_string(),
        }
    }

    pub fn state(&self) -> Arc<SocketState> {
        self.state.clone()
    }

    /// Bind the listening socket. Serving starts separately so callers can
    /// treat a successful bind as "started".
    pub async fn bind(&self, host: &str, port: u16) -> Result<TcpListener> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket server to {}", addr))?;
        tracing::info!("WebSocket server listening on {}", addr);
        Ok(listener)
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("Failed to accept TCP connection")?;
            let state = self.state.clone();
            let ws_path = self.ws_path.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state, ws_path).await {
                    tracing::debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<SocketState>,
    ws_path: String,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &HandshakeRequest, response: HandshakeResponse| {
            if request.uri().path() == ws_path {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("Not found".to_string()));
                *rejection.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
                Err(rejection)
            }
        },
    )
    .await
    .context("WebSocket handshake failed")?;

    let (conn, mut outbound_rx) = state.register_connection().await;
    tracing::debug!("WebSocket connection {} established", conn);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(msg)) => {
                        if msg.is_text() {
                            let Ok(text) = msg.to_text() else {
                                break;
                            };
                            match dispatch_frame(&state, conn, text).await {
                                DispatchAction::Continue => {}
                                DispatchAction::Close => break,
                            }
                        } else if msg.is_close() {
                            break;
                        } else if msg.is_ping() || msg.is_pong() {
                            // Transport-level keepalive, answered by the
                            // websocket layer.
                        } else {
                            // Binary and other frame kinds are protocol
                            // violations.
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                }
            }

            queued = outbound_rx.recv() => {
                match queued {
                    Some(frame) => {
                        if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.teardown_connection(conn).await;
    tracing::debug!("Connection {} closed", conn);
    Ok(())
}
