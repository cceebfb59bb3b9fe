// Payload Dispatch
//
// Explicit registration table built at startup: one entry per payload
// type carrying its schema check, its capability policy, and the handler
// function. Dispatch evaluates, in fixed order: envelope shape, known
// type, schema, policy, handler.

use crate::protocol::*;
use crate::server::{ConnId, SocketState};
use presenti_core::Scope;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What the connection loop should do after a frame was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    Continue,
    Close,
}

/// Capability policy attached to a handler. Violations close the
/// connection with no reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFlags {
    pub require_auth: bool,
    pub deny_auth: bool,
    pub require_first_party: bool,
    pub deny_first_party: bool,
}

type SchemaFn = fn(&JsonValue) -> bool;
type HandlerFuture = Pin<Box<dyn Future<Output = DispatchAction> + Send>>;
type HandlerFn = fn(Arc<SocketState>, ConnId, JsonValue) -> HandlerFuture;

pub struct HandlerEntry {
    pub policy: PolicyFlags,
    pub schema: SchemaFn,
    pub handler: HandlerFn,
}

pub struct HandlerTable {
    entries: HashMap<PayloadType, HandlerEntry>,
}

impl HandlerTable {
    /// The standard registration table. PONG and GREETINGS are
    /// outbound-only: inbound frames of those types are dropped.
    pub fn standard() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
        };

        table.register(
            PayloadType::Identify,
            PolicyFlags {
                deny_auth: true,
                ..Default::default()
            },
            schema_identify,
            handle_identify,
        );
        table.register(
            PayloadType::Ping,
            PolicyFlags::default(),
            schema_any,
            handle_ping,
        );
        table.register(
            PayloadType::Presence,
            PolicyFlags {
                require_auth: true,
                deny_first_party: true,
                ..Default::default()
            },
            schema_presence,
            handle_presence,
        );
        table.register(
            PayloadType::PresenceFirstParty,
            PolicyFlags {
                require_auth: true,
                require_first_party: true,
                ..Default::default()
            },
            schema_first_party_presence,
            handle_first_party_presence,
        );
        table.register(
            PayloadType::Subscribe,
            PolicyFlags::default(),
            schema_subscribe,
            handle_subscribe,
        );
        table.register(
            PayloadType::Unsubscribe,
            PolicyFlags::default(),
            schema_subscribe,
            handle_unsubscribe,
        );

        table
    }

    fn register(
        &mut self,
        payload_type: PayloadType,
        policy: PolicyFlags,
        schema: SchemaFn,
        handler: HandlerFn,
    ) {
        self.entries.insert(
            payload_type,
            HandlerEntry {
                policy,
                schema,
                handler,
            },
        );
    }

    pub fn get(&self, payload_type: PayloadType) -> Option<&HandlerEntry> {
        self.entries.get(&payload_type)
    }
}

/// Process one inbound text frame.
pub async fn dispatch_frame(
    state: &Arc<SocketState>,
    conn: ConnId,
    text: &str,
) -> DispatchAction {
    // 1. Malformed JSON or unrecognizable envelope: close.
    let Ok(raw) = serde_json::from_str::<RawEnvelope>(text) else {
        tracing::debug!("Closing connection {}: malformed frame", conn);
        return DispatchAction::Close;
    };

    // 2. Unknown type, or a type with no registered handler: drop.
    let Some(payload_type) = PayloadType::resolve(&raw.payload_type) else {
        return DispatchAction::Continue;
    };
    let Some(entry) = state.handlers().get(payload_type) else {
        return DispatchAction::Continue;
    };

    // 3. Schema validation for this type: close on failure.
    if !(entry.schema)(&raw.data) {
        tracing::debug!("Closing connection {}: schema violation", conn);
        return DispatchAction::Close;
    }

    // 4-7. Capability policy, in fixed order.
    let (authenticated, first_party) = state.connection_flags(conn).await;
    let policy = entry.policy;
    if policy.deny_auth && authenticated {
        return DispatchAction::Close;
    }
    if policy.require_auth && !authenticated {
        return DispatchAction::Close;
    }
    if policy.deny_first_party && first_party {
        return DispatchAction::Close;
    }
    if policy.require_first_party && !first_party {
        return DispatchAction::Close;
    }

    // 8. Invoke.
    (entry.handler)(state.clone(), conn, raw.data).await
}

// ============================================================================
// Schema checks
// ============================================================================

fn schema_any(_data: &JsonValue) -> bool {
    true
}

fn schema_identify(data: &JsonValue) -> bool {
    serde_json::from_value::<IdentifyPayload>(data.clone()).is_ok()
}

fn schema_presence(data: &JsonValue) -> bool {
    serde_json::from_value::<PresencePayload>(data.clone()).is_ok()
}

fn schema_first_party_presence(data: &JsonValue) -> bool {
    serde_json::from_value::<FirstPartyPresencePayload>(data.clone()).is_ok()
}

fn schema_subscribe(data: &JsonValue) -> bool {
    serde_json::from_value::<SubscribePayload>(data.clone()).is_ok()
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_identify(state: Arc<SocketState>, conn: ConnId, data: JsonValue) -> HandlerFuture {
    Box::pin(async move {
        let Ok(payload) = serde_json::from_value::<IdentifyPayload>(data) else {
            return DispatchAction::Close;
        };

        let scope = match state.validator().validate(&payload.token).await {
            Ok(Some(scope)) => scope,
            Ok(None) => {
                tracing::debug!("Closing connection {}: invalid token", conn);
                return DispatchAction::Close;
            }
            Err(e) => {
                tracing::warn!("Token validation errored for {}: {}", conn, e);
                return DispatchAction::Close;
            }
        };

        state.authenticate(conn, scope).await;
        if !payload.suppress_greetings {
            state
                .send(conn, PayloadType::Greetings, JsonValue::Null)
                .await;
        }
        DispatchAction::Continue
    })
}

fn handle_ping(state: Arc<SocketState>, conn: ConnId, _data: JsonValue) -> HandlerFuture {
    Box::pin(async move {
        state.send(conn, PayloadType::Pong, JsonValue::Null).await;
        DispatchAction::Continue
    })
}

fn handle_presence(state: Arc<SocketState>, conn: ConnId, data: JsonValue) -> HandlerFuture {
    Box::pin(async move {
        let Ok(payload) = serde_json::from_value::<PresencePayload>(data) else {
            return DispatchAction::Close;
        };
        let Some(scope) = state.connection_scope(conn).await else {
            // require_auth guarantees a scope; a missing one is a policy
            // table bug.
            return DispatchAction::Close;
        };
        state
            .ledger()
            .set(&conn.to_string(), &scope, payload.presences);
        DispatchAction::Continue
    })
}

fn handle_first_party_presence(
    state: Arc<SocketState>,
    conn: ConnId,
    data: JsonValue,
) -> HandlerFuture {
    Box::pin(async move {
        let Ok(payload) = serde_json::from_value::<FirstPartyPresencePayload>(data) else {
            return DispatchAction::Close;
        };
        let target = Scope::from(payload.scope);
        state
            .ledger()
            .set(&conn.to_string(), &target, payload.presences);
        DispatchAction::Continue
    })
}

fn handle_subscribe(state: Arc<SocketState>, conn: ConnId, data: JsonValue) -> HandlerFuture {
    Box::pin(async move {
        let Ok(payload) = serde_json::from_value::<SubscribePayload>(data) else {
            return DispatchAction::Close;
        };
        let scope = Scope::from(payload.scope);
        state.subscribe(&scope, conn).await;

        // New subscribers immediately receive the current view.
        let payload = state.payloads().payload_for(&scope).await;
        state
            .send(conn, PayloadType::Presence, json!({ "scope": scope, "payload": payload }))
            .await;
        DispatchAction::Continue
    })
}

fn handle_unsubscribe(state: Arc<SocketState>, conn: ConnId, data: JsonValue) -> HandlerFuture {
    Box::pin(async move {
        let Ok(payload) = serde_json::from_value::<SubscribePayload>(data) else {
            return DispatchAction::Close;
        };
        state.unsubscribe(&Scope::from(payload.scope), conn).await;
        DispatchAction::Continue
    })
}
