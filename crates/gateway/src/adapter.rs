// Socket-Backed Adapter
//
// Wraps the WebSocket server's ledger in the Adapter interface so the
// supervisor tree can query presence written over socket connections the
// same way it queries every other source.

use crate::server::{PayloadSource, SocketServer, SocketState};
use async_trait::async_trait;
use presenti_core::{
    Adapter, AdapterState, AdapterStateCell, CoreError, LedgerCondenser, PresenceLedger,
    PresenceList, Scope, TokenValidator,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct SocketAdapter {
    server: SocketServer,
    condenser: LedgerCondenser,
    host: String,
    port: u16,
    state: AdapterStateCell,
}

impl SocketAdapter {
    pub fn new(
        host: &str,
        port: u16,
        ws_path: &str,
        validator: Arc<dyn TokenValidator>,
        ledger: Arc<PresenceLedger>,
        payloads: Arc<dyn PayloadSource>,
    ) -> Self {
        let server = SocketServer::new(validator, ledger.clone(), payloads, ws_path);
        Self {
            server,
            condenser: LedgerCondenser::new(vec![ledger]),
            host: host.to_string(),
            port,
            state: AdapterStateCell::new(),
        }
    }

    pub fn socket_state(&self) -> Arc<SocketState> {
        self.server.state()
    }
}

#[async_trait]
impl Adapter for SocketAdapter {
    fn state(&self) -> AdapterState {
        self.state.get()
    }

    /// Bind the listener, hand the accept loop to a background task, and
    /// report running. Bind failures surface as startup errors.
    async fn run(&self) -> Result<(), CoreError> {
        let listener = self
            .server
            .bind(&self.host, self.port)
            .await
            .map_err(|e| CoreError::AdapterStartup(e.to_string()))?;

        let server = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!("WebSocket accept loop terminated: {}", e);
            }
        });

        self.state.set_running();
        Ok(())
    }

    async fn activity_for_scope(&self, scope: &Scope) -> Result<PresenceList, CoreError> {
        Ok(self.condenser.scoped(scope))
    }

    async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
        Ok(self.condenser.activities())
    }
}
