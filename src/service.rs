// Service Wiring
//
// Builds the adapter/supervisor tree from config, bridges the synchronous
// update bus into an async dispatcher, and keeps a per-scope cache of
// composed payloads so subscriber pushes and initial subscription replies
// share one view.

use anyhow::{Context, Result};
use async_trait::async_trait;
use presenti_core::{
    Config, FileBlobStore, GradientStateAdapter, HttpPaletteExtractor, LinkBus, MasterSupervisor,
    MemoryLinkStore, PresenceLedger, PresenceList, Scope, StaticTokenValidator, StorageAdapter,
    TokenValidator, Updates,
};
use presenti_gateway::{PayloadSource, SocketAdapter, SocketState};
use presenti_platforms::{DiscordAdapter, PresenceSink, ScopeDirectory, DISCORD_PLATFORM};
use presenti_session::{RestSessionAdapter, SessionRegistry};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Coalescing window for update bursts: rapid churn on one scope costs a
/// single recompute and push.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Per-scope cache of composed payloads. The supervisor reference arrives
/// after construction because the socket adapter (which needs the cache)
/// is itself registered with the supervisor.
pub struct CachedPayloads {
    cache: Mutex<HashMap<Scope, JsonValue>>,
    master: OnceLock<Arc<MasterSupervisor>>,
}

impl CachedPayloads {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cache: Mutex::new(HashMap::new()),
            master: OnceLock::new(),
        })
    }

    pub fn set_master(&self, master: Arc<MasterSupervisor>) {
        if self.master.set(master).is_err() {
            panic!("payload cache wired to a supervisor twice");
        }
    }

    /// Recompute a scope's payload from the supervisor tree and cache it.
    /// The first computation for a scope counts as "newly greeted" so the
    /// gradient reports its short transition.
    pub async fn recompute(&self, scope: &Scope) -> JsonValue {
        let master = self
            .master
            .get()
            .expect("payload cache used before supervisor wiring");
        let newly_greeted = !self.cache.lock().unwrap().contains_key(scope);
        let payload = master.scoped_payload(scope, newly_greeted).await;
        let value = serde_json::to_value(&payload).unwrap_or(JsonValue::Null);
        self.cache
            .lock()
            .unwrap()
            .insert(scope.clone(), value.clone());
        value
    }
}

#[async_trait]
impl PayloadSource for CachedPayloads {
    async fn payload_for(&self, scope: &Scope) -> JsonValue {
        let cached = self.cache.lock().unwrap().get(scope).cloned();
        match cached {
            Some(value) => value,
            None => self.recompute(scope).await,
        }
    }
}

/// Drain the update channel, coalescing bursts per scope, then recompute
/// each affected scope once, push it to socket subscribers, and forward
/// it to every outbound platform pipe.
async fn dispatch_updates(
    mut rx: mpsc::UnboundedReceiver<Scope>,
    payloads: Arc<CachedPayloads>,
    socket_state: Arc<SocketState>,
    sinks: Vec<Arc<dyn PresenceSink>>,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = HashSet::new();
        pending.insert(first);

        let window = tokio::time::sleep(DEBOUNCE_WINDOW);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                more = rx.recv() => match more {
                    Some(scope) => {
                        pending.insert(scope);
                    }
                    None => break,
                },
            }
        }

        for scope in pending {
            let payload = payloads.recompute(&scope).await;
            let presences: PresenceList =
                serde_json::from_value(payload["presences"].clone()).unwrap_or_default();
            socket_state.broadcast(&scope, payload).await;

            for sink in &sinks {
                if let Err(e) = sink.push_presence(&scope, &presences).await {
                    tracing::warn!("Outbound presence push failed for {}: {}", scope, e);
                }
            }
        }
    }
}

pub async fn run(config: Config) -> Result<()> {
    let updates = Updates::new();
    let link_bus = LinkBus::new();

    let validator = build_validator(&config).await?;

    let master = Arc::new(MasterSupervisor::new());
    let payloads = CachedPayloads::new();

    // Socket gateway.
    let gateway_ledger = Arc::new(PresenceLedger::new(updates.clone()));
    let socket_adapter = Arc::new(SocketAdapter::new(
        &config.gateway.host,
        config.gateway.port,
        &config.gateway.ws_path,
        validator.clone(),
        gateway_ledger,
        payloads.clone(),
    ));
    let socket_state = socket_adapter.socket_state();
    master.register_adapter(socket_adapter);

    // REST sessions.
    let session_ledger = Arc::new(PresenceLedger::new(updates.clone()));
    let registry = SessionRegistry::new(
        validator.clone(),
        session_ledger,
        Duration::from_secs(config.session.ttl_secs),
    );
    master.register_adapter(Arc::new(RestSessionAdapter::new(
        &config.session.host,
        config.session.port,
        registry,
    )));

    // Durable presence, when a storage directory is configured.
    if let Some(path) = &config.storage.path {
        let store = Arc::new(FileBlobStore::new(path).context("Failed to open storage directory")?);
        let storage_ledger = Arc::new(PresenceLedger::new(updates.clone()));
        master.register_adapter(Arc::new(StorageAdapter::new(
            "presences",
            store,
            storage_ledger,
        )));
    }

    // Discord bridge, when a bot token is configured. The adapter also
    // serves as the outbound pipe for presenti-authoritative links.
    let mut sinks: Vec<Arc<dyn PresenceSink>> = Vec::new();
    let link_store = Arc::new(MemoryLinkStore::new(link_bus.clone()));
    if let Some(bot_token) = config.discord.resolve_token() {
        let directory = ScopeDirectory::new(DISCORD_PLATFORM, updates.clone());
        directory.attach(&link_bus);
        directory
            .reload(link_store.as_ref())
            .await
            .context("Failed to load platform links")?;

        let discord_ledger = Arc::new(PresenceLedger::new(updates.clone()));
        let discord = Arc::new(DiscordAdapter::new(bot_token, directory, discord_ledger));
        sinks.push(discord.clone());
        master.register_adapter(discord);
    } else {
        tracing::info!("No Discord bot token configured, bridge disabled");
    }

    // Gradient scheduler, when an extractor endpoint is configured.
    if let Some(endpoint) = &config.gradient.extractor_endpoint {
        let extractor = Arc::new(HttpPaletteExtractor::new(
            endpoint.clone(),
            config.gradient.palette_size,
        ));
        master.register_state_adapter(Arc::new(GradientStateAdapter::new(
            extractor,
            updates.clone(),
            &config.gradient,
        )));
    } else {
        tracing::info!("No palette extractor configured, gradient disabled");
    }

    payloads.set_master(master.clone());

    // Bridge the synchronous bus into the async dispatcher.
    let (tx, rx) = mpsc::unbounded_channel();
    updates.subscribe(move |scope: &Scope| {
        let _ = tx.send(scope.clone());
    });
    tokio::spawn(dispatch_updates(rx, payloads, socket_state, sinks));

    master.run().await;
    tracing::info!("All adapters started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    Ok(())
}

async fn build_validator(config: &Config) -> Result<Arc<dyn TokenValidator>> {
    let validator = StaticTokenValidator::new();
    for entry in &config.auth.tokens {
        let scope = if entry.first_party {
            Scope::FirstParty
        } else {
            match &entry.scope {
                Some(scope) => Scope::user(scope.clone()),
                None => {
                    tracing::warn!("Skipping token entry with no scope");
                    continue;
                }
            }
        };
        validator
            .register(entry.token.clone(), scope)
            .await
            .context("Invalid token in config")?;
    }
    Ok(Arc::new(validator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use presenti_core::{
        Adapter, AdapterState, AdapterStateCell, CoreError, PresenceBuilder, PresenceList,
    };

    struct FixedAdapter {
        state: AdapterStateCell,
        records: PresenceList,
    }

    #[async_trait]
    impl Adapter for FixedAdapter {
        fn state(&self) -> AdapterState {
            self.state.get()
        }

        async fn run(&self) -> Result<(), CoreError> {
            self.state.set_running();
            Ok(())
        }

        async fn activity_for_scope(&self, _scope: &Scope) -> Result<PresenceList, CoreError> {
            Ok(self.records.clone())
        }

        async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_payload_cache_recomputes_on_demand() {
        let master = Arc::new(MasterSupervisor::new());
        master.register_adapter(Arc::new(FixedAdapter {
            state: AdapterStateCell::new(),
            records: vec![PresenceBuilder::new().title("Reading").build()],
        }));
        master.run().await;

        let payloads = CachedPayloads::new();
        payloads.set_master(master);

        let scope = Scope::user("venus");
        let payload = payloads.payload_for(&scope).await;
        assert_eq!(payload["presences"][0]["title"], "Reading");

        // Second read is served from cache.
        let cached = payloads.payload_for(&scope).await;
        assert_eq!(cached, payload);
    }

    #[tokio::test]
    #[should_panic(expected = "wired to a supervisor twice")]
    async fn test_double_wiring_panics() {
        let payloads = CachedPayloads::new();
        payloads.set_master(Arc::new(MasterSupervisor::new()));
        payloads.set_master(Arc::new(MasterSupervisor::new()));
    }

    struct RecordingSink {
        pushes: Mutex<Vec<(Scope, PresenceList)>>,
    }

    #[async_trait]
    impl PresenceSink for RecordingSink {
        async fn push_presence(
            &self,
            scope: &Scope,
            presences: &PresenceList,
        ) -> Result<(), CoreError> {
            self.pushes
                .lock()
                .unwrap()
                .push((scope.clone(), presences.clone()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_forwards_recomputed_scopes_to_sinks() {
        let master = Arc::new(MasterSupervisor::new());
        master.register_adapter(Arc::new(FixedAdapter {
            state: AdapterStateCell::new(),
            records: vec![PresenceBuilder::new().title("Reading").build()],
        }));
        master.run().await;

        let payloads = CachedPayloads::new();
        payloads.set_master(master);
        let socket_state = Arc::new(SocketState::new(
            Arc::new(StaticTokenValidator::new()),
            Arc::new(PresenceLedger::new(Updates::new())),
            payloads.clone(),
        ));

        let sink = Arc::new(RecordingSink {
            pushes: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_updates(
            rx,
            payloads,
            socket_state,
            vec![sink.clone()],
        ));

        tx.send(Scope::user("venus")).unwrap();
        tokio::task::yield_now().await;
        tokio::time::advance(DEBOUNCE_WINDOW + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let pushes = sink.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, Scope::user("venus"));
        assert_eq!(pushes[0].1[0].title.as_deref(), Some("Reading"));
    }
}
