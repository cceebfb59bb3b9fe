// Adapter / Supervisor Tree
//
// Supervisors register adapters, start them concurrently, and answer
// aggregate queries by fanning out to every running adapter and
// concatenating non-empty results. A failing adapter contributes an empty
// result; it never aborts the whole query. The MasterSupervisor composes
// the raw-presence supervisor and the derived-state supervisor into one
// merged payload per scope.

use crate::adapter::{Adapter, AdapterState, AdapterStateCell, StateAdapter};
use crate::presence::{PresenceList, PresenceRecord};
use crate::scope::Scope;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// Bound on a single adapter's `run()`; one slow startup must not hang
/// the rest.
const ADAPTER_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AdapterSupervisor {
    adapters: Mutex<Vec<Arc<dyn Adapter>>>,
    state: AdapterStateCell,
}

impl AdapterSupervisor {
    pub fn new() -> Self {
        Self {
            adapters: Mutex::new(Vec::new()),
            state: AdapterStateCell::new(),
        }
    }

    /// Register an adapter. Registering the same instance twice is a
    /// programming error and panics.
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let mut adapters = self.adapters.lock().unwrap();
        assert!(
            !adapters.iter().any(|a| Arc::ptr_eq(a, &adapter)),
            "adapter instance registered twice"
        );
        adapters.push(adapter);
    }

    pub fn state(&self) -> AdapterState {
        self.state.get()
    }

    /// Start every `Ready` adapter concurrently. Startup failures and
    /// timeouts are logged and isolated; the supervisor flips to
    /// `Running` once every startup attempt has resolved.
    pub async fn run(&self) {
        let adapters = self.snapshot();
        let startups = adapters
            .into_iter()
            .filter(|a| a.state() == AdapterState::Ready)
            .map(|adapter| async move {
                match timeout(ADAPTER_STARTUP_TIMEOUT, adapter.run()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Adapter startup failed: {}", e),
                    Err(_) => tracing::error!(
                        "Adapter startup timed out after {:?}",
                        ADAPTER_STARTUP_TIMEOUT
                    ),
                }
            });
        join_all(startups).await;
        self.state.set_running();
    }

    /// Fan out `activity_for_scope` to every running adapter and
    /// concatenate non-empty results in registration order.
    pub async fn scoped_data(&self, scope: &Scope) -> PresenceList {
        let adapters = self.running();
        let results = join_all(adapters.iter().map(|a| a.activity_for_scope(scope))).await;

        let mut merged = Vec::new();
        for result in results {
            match result {
                Ok(records) => merged.extend(records),
                Err(e) => tracing::warn!("Adapter scoped query failed, treating as empty: {}", e),
            }
        }
        merged
    }

    /// Fan out `activities` and merge the per-adapter maps.
    pub async fn global_data(&self) -> HashMap<Scope, PresenceList> {
        let adapters = self.running();
        let results = join_all(adapters.iter().map(|a| a.activities())).await;

        let mut merged: HashMap<Scope, PresenceList> = HashMap::new();
        for result in results {
            match result {
                Ok(map) => {
                    for (scope, records) in map {
                        merged.entry(scope).or_default().extend(records);
                    }
                }
                Err(e) => tracing::warn!("Adapter global query failed, treating as empty: {}", e),
            }
        }
        merged
    }

    fn snapshot(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters.lock().unwrap().clone()
    }

    fn running(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.state() == AdapterState::Running)
            .cloned()
            .collect()
    }
}

impl Default for AdapterSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StateSupervisor {
    adapters: Mutex<Vec<Arc<dyn StateAdapter>>>,
    state: AdapterStateCell,
}

impl StateSupervisor {
    pub fn new() -> Self {
        Self {
            adapters: Mutex::new(Vec::new()),
            state: AdapterStateCell::new(),
        }
    }

    pub fn register(&self, adapter: Arc<dyn StateAdapter>) {
        let mut adapters = self.adapters.lock().unwrap();
        assert!(
            !adapters.iter().any(|a| Arc::ptr_eq(a, &adapter)),
            "state adapter instance registered twice"
        );
        adapters.push(adapter);
    }

    pub async fn run(&self) {
        let adapters: Vec<_> = self.adapters.lock().unwrap().clone();
        let startups = adapters
            .into_iter()
            .filter(|a| a.state() == AdapterState::Ready)
            .map(|adapter| async move {
                match timeout(ADAPTER_STARTUP_TIMEOUT, adapter.run()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("State adapter startup failed: {}", e),
                    Err(_) => tracing::error!("State adapter startup timed out"),
                }
            });
        join_all(startups).await;
        self.state.set_running();
    }

    /// Merge every state adapter's map shallowly: later adapters extend
    /// keys whose values are objects and override everything else.
    pub async fn scoped_state(
        &self,
        scope: &Scope,
        presences: &[PresenceRecord],
        newly_greeted: bool,
    ) -> Map<String, Value> {
        let adapters: Vec<_> = self
            .adapters
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.state() == AdapterState::Running)
            .cloned()
            .collect();

        let results = join_all(
            adapters
                .iter()
                .map(|a| a.state_for_scope(scope, presences, newly_greeted)),
        )
        .await;

        let mut merged = Map::new();
        for result in results {
            match result {
                Ok(map) => shallow_merge(&mut merged, map),
                Err(e) => tracing::warn!("State adapter query failed, treating as empty: {}", e),
            }
        }
        merged
    }
}

impl Default for StateSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn shallow_merge(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                existing.extend(update);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// The merged per-scope view pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ScopedPayload {
    pub presences: PresenceList,
    pub state: Map<String, Value>,
}

/// Composes raw presence and derived state into one payload per scope.
pub struct MasterSupervisor {
    adapters: AdapterSupervisor,
    states: StateSupervisor,
}

impl MasterSupervisor {
    pub fn new() -> Self {
        Self {
            adapters: AdapterSupervisor::new(),
            states: StateSupervisor::new(),
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.register(adapter);
    }

    pub fn register_state_adapter(&self, adapter: Arc<dyn StateAdapter>) {
        self.states.register(adapter);
    }

    pub async fn run(&self) {
        tokio::join!(self.adapters.run(), self.states.run());
    }

    pub async fn scoped_payload(&self, scope: &Scope, newly_greeted: bool) -> ScopedPayload {
        let presences = self.adapters.scoped_data(scope).await;
        let state = self
            .states
            .scoped_state(scope, &presences, newly_greeted)
            .await;
        ScopedPayload { presences, state }
    }

    pub async fn scoped_data(&self, scope: &Scope) -> PresenceList {
        self.adapters.scoped_data(scope).await
    }

    pub async fn global_data(&self) -> HashMap<Scope, PresenceList> {
        self.adapters.global_data().await
    }
}

impl Default for MasterSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::presence::PresenceBuilder;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedAdapter {
        state: AdapterStateCell,
        records: PresenceList,
        fail_queries: bool,
    }

    impl FixedAdapter {
        fn new(records: PresenceList) -> Arc<Self> {
            Arc::new(Self {
                state: AdapterStateCell::new(),
                records,
                fail_queries: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                state: AdapterStateCell::new(),
                records: Vec::new(),
                fail_queries: true,
            })
        }
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
            if self.fail_queries {
                return Err(CoreError::AdapterStartup("query failure".into()));
            }
            Ok(self.records.clone())
        }

        async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
            if self.fail_queries {
                return Err(CoreError::AdapterStartup("query failure".into()));
            }
            let mut map = HashMap::new();
            if !self.records.is_empty() {
                map.insert(Scope::user("alice"), self.records.clone());
            }
            Ok(map)
        }
    }

    struct FixedState {
        state: AdapterStateCell,
        value: Map<String, Value>,
    }

    impl FixedState {
        fn new(value: Value) -> Arc<Self> {
            let Value::Object(value) = value else {
                panic!("fixture must be an object");
            };
            Arc::new(Self {
                state: AdapterStateCell::new(),
                value,
            })
        }
    }

    #[async_trait]
    impl StateAdapter for FixedState {
        fn state(&self) -> AdapterState {
            self.state.get()
        }

        async fn run(&self) -> Result<(), CoreError> {
            self.state.set_running();
            Ok(())
        }

        async fn state_for_scope(
            &self,
            _scope: &Scope,
            _presences: &[PresenceRecord],
            _newly_greeted: bool,
        ) -> Result<Map<String, Value>, CoreError> {
            Ok(self.value.clone())
        }
    }

    fn record(id: &str) -> PresenceRecord {
        PresenceBuilder::new().id(id).build()
    }

    #[tokio::test]
    async fn test_scoped_data_concatenates_in_registration_order() {
        let supervisor = AdapterSupervisor::new();
        supervisor.register(FixedAdapter::new(vec![record("a")]));
        supervisor.register(FixedAdapter::new(vec![record("b")]));
        supervisor.run().await;

        let merged = supervisor.scoped_data(&Scope::user("alice")).await;
        let ids: Vec<_> = merged.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_adapter_contributes_empty() {
        let supervisor = AdapterSupervisor::new();
        supervisor.register(FixedAdapter::failing());
        supervisor.register(FixedAdapter::new(vec![record("ok")]));
        supervisor.run().await;

        let merged = supervisor.scoped_data(&Scope::user("alice")).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_ready_adapters_are_not_queried() {
        let supervisor = AdapterSupervisor::new();
        supervisor.register(FixedAdapter::new(vec![record("a")]));
        // No run(): adapter stays Ready.
        assert!(supervisor.scoped_data(&Scope::user("alice")).await.is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "registered twice")]
    async fn test_duplicate_registration_panics() {
        let supervisor = AdapterSupervisor::new();
        let adapter = FixedAdapter::new(Vec::new());
        supervisor.register(adapter.clone());
        supervisor.register(adapter);
    }

    #[tokio::test]
    async fn test_state_merge_is_shallow_for_objects() {
        let supervisor = StateSupervisor::new();
        supervisor.register(FixedState::new(
            json!({"gradient": {"color": "#111111"}, "plain": 1}),
        ));
        supervisor.register(FixedState::new(
            json!({"gradient": {"transition": 300}, "plain": 2}),
        ));
        supervisor.run().await;

        let merged = supervisor
            .scoped_state(&Scope::user("alice"), &[], false)
            .await;
        let gradient = merged.get("gradient").unwrap();
        assert_eq!(gradient["color"], "#111111");
        assert_eq!(gradient["transition"], 300);
        assert_eq!(merged["plain"], 2);
    }

    #[tokio::test]
    async fn test_master_payload_combines_presence_and_state() {
        let master = MasterSupervisor::new();
        master.register_adapter(FixedAdapter::new(vec![record("a")]));
        master.register_state_adapter(FixedState::new(json!({"gradient": {"color": "#fff"}})));
        master.run().await;

        let payload = master.scoped_payload(&Scope::user("alice"), false).await;
        assert_eq!(payload.presences.len(), 1);
        assert!(payload.state.contains_key("gradient"));
    }
}
