// REST Session Adapter
//
// A connectionless presence channel: clients exchange a bearer token for a
// session id and write presence under it until the session expires.
// Expiry is a sliding TTL driven by refresh calls; a new expiry timer
// always cancels the prior one. Expiry and explicit destruction are
// symmetric with socket close: the session's ledger contribution is
// removed and `updated` fires for the affected scope.

use crate::error::SessionError;
use async_trait::async_trait;
use presenti_core::{
    Adapter, AdapterState, AdapterStateCell, CoreError, PresenceLedger, PresenceList, Scope,
    TokenValidator,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

struct SessionEntry {
    scope: Scope,
    expiry: JoinHandle<()>,
}

/// Descriptor returned from a successful token exchange.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub id: String,
    pub scope: Scope,
    pub expires_in: Duration,
}

/// Session bookkeeping shared between the HTTP layer and the adapter.
pub struct SessionRegistry {
    validator: Arc<dyn TokenValidator>,
    ledger: Arc<PresenceLedger>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        ledger: Arc<PresenceLedger>,
        ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            validator,
            ledger,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Exchange a token for a new session bound to the token's scope.
    /// This path is third-party only; first-party tokens have the scoped
    /// endpoint instead.
    pub async fn create_session(&self, token: &str) -> Result<SessionDescriptor, SessionError> {
        let scope = self
            .validator
            .validate(token)
            .await?
            .ok_or(SessionError::InvalidToken)?;
        if scope.is_first_party() {
            return Err(SessionError::FirstPartyToken);
        }

        let id = Uuid::new_v4().to_string();
        let expiry = self.arm_expiry(id.clone());
        self.sessions.lock().unwrap().insert(
            id.clone(),
            SessionEntry {
                scope: scope.clone(),
                expiry,
            },
        );
        tracing::debug!("Session {} opened for scope {}", id, scope);

        Ok(SessionDescriptor {
            id,
            scope,
            expires_in: self.ttl,
        })
    }

    /// Replace the entire presence list for the session's own scope.
    pub fn set_presences(&self, id: &str, records: PresenceList) -> Result<(), SessionError> {
        let scope = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(id)
                .map(|entry| entry.scope.clone())
                .ok_or(SessionError::UnknownSession)?
        };
        self.ledger.set(id, &scope, records);
        Ok(())
    }

    /// Trusted write to an arbitrary scope, bypassing session ownership.
    pub async fn set_scoped(
        &self,
        token: &str,
        scope: &Scope,
        records: PresenceList,
    ) -> Result<(), SessionError> {
        let caller = self
            .validator
            .validate(token)
            .await?
            .ok_or(SessionError::InvalidToken)?;
        if !caller.is_first_party() {
            return Err(SessionError::FirstPartyRequired);
        }
        self.ledger.set(&format!("scoped:{}", scope), scope, records);
        Ok(())
    }

    /// Slide the TTL: cancel the pending expiry and arm a fresh one.
    pub fn refresh(&self, id: &str) -> Result<(), SessionError> {
        let expiry = self.arm_expiry(id.to_string());
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(entry) => {
                entry.expiry.abort();
                entry.expiry = expiry;
                Ok(())
            }
            None => {
                expiry.abort();
                Err(SessionError::UnknownSession)
            }
        }
    }

    pub fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let entry = self
            .sessions
            .lock()
            .unwrap()
            .remove(id)
            .ok_or(SessionError::UnknownSession)?;
        entry.expiry.abort();
        self.ledger.remove_entry(id);
        tracing::debug!("Session {} destroyed", id);
        Ok(())
    }

    pub fn session_scope(&self, id: &str) -> Option<Scope> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .map(|entry| entry.scope.clone())
    }

    fn arm_expiry(&self, id: String) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let ledger = self.ledger.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if sessions.lock().unwrap().remove(&id).is_some() {
                tracing::debug!("Session {} expired", id);
            }
            ledger.remove_entry(&id);
        })
    }
}

/// Presence adapter view over the registry's ledger, plus the HTTP server
/// lifecycle.
pub struct RestSessionAdapter {
    registry: Arc<SessionRegistry>,
    host: String,
    port: u16,
    state: AdapterStateCell,
}

impl RestSessionAdapter {
    pub fn new(host: &str, port: u16, registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            host: host.to_string(),
            port,
            state: AdapterStateCell::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Adapter for RestSessionAdapter {
    fn state(&self) -> AdapterState {
        self.state.get()
    }

    async fn run(&self) -> Result<(), CoreError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoreError::AdapterStartup(format!("bind {}: {}", addr, e)))?;
        tracing::info!("Session HTTP server listening on {}", addr);

        let router = crate::http::router(self.registry.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Session HTTP server terminated: {}", e);
            }
        });

        self.state.set_running();
        Ok(())
    }

    async fn activity_for_scope(&self, scope: &Scope) -> Result<PresenceList, CoreError> {
        Ok(self.registry.ledger.scoped(scope))
    }

    async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
        Ok(self.registry.ledger.activities())
    }
}
