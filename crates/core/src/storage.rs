// Storage-Backed Presence
//
// A storage-backed adapter keeps one persisted JSON blob per adapter
// identity so its presence survives process restarts. The blob is the
// full per-scope snapshot, rewritten on every write; this is a tiny
// amount of data and keeps recovery a single load.

use crate::adapter::{Adapter, AdapterState, AdapterStateCell};
use crate::error::CoreError;
use crate::ledger::PresenceLedger;
use crate::presence::PresenceList;
use crate::scope::Scope;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One persisted JSON blob per adapter identity.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn load(&self, identity: &str) -> Result<Option<JsonValue>, CoreError>;

    async fn save(&self, identity: &str, blob: &JsonValue) -> Result<(), CoreError>;
}

/// Blob store over a directory of `<identity>.json` files.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        let dir = std::fs::canonicalize(dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, identity: &str) -> Result<PathBuf, CoreError> {
        if identity.is_empty()
            || !identity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::Storage(format!(
                "invalid adapter identity: {:?}",
                identity
            )));
        }
        Ok(self.dir.join(format!("{}.json", identity)))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self, identity: &str) -> Result<Option<JsonValue>, CoreError> {
        let path = self.blob_path(identity)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, identity: &str, blob: &JsonValue) -> Result<(), CoreError> {
        let path = self.blob_path(identity)?;
        let content = serde_json::to_string_pretty(blob)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// In-memory blob store used in tests and single-process deployments.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, identity: &str) -> Result<Option<JsonValue>, CoreError> {
        Ok(self.blobs.read().await.get(identity).cloned())
    }

    async fn save(&self, identity: &str, blob: &JsonValue) -> Result<(), CoreError> {
        self.blobs
            .write()
            .await
            .insert(identity.to_string(), blob.clone());
        Ok(())
    }
}

/// Presence adapter whose ledger is hydrated from its blob at startup
/// and snapshotted back on every write. Ledger writes go through
/// `set_presences` so write and persist stay paired.
pub struct StorageAdapter {
    identity: String,
    store: Arc<dyn BlobStore>,
    ledger: Arc<PresenceLedger>,
    state: AdapterStateCell,
}

impl StorageAdapter {
    pub fn new(
        identity: impl Into<String>,
        store: Arc<dyn BlobStore>,
        ledger: Arc<PresenceLedger>,
    ) -> Self {
        Self {
            identity: identity.into(),
            store,
            ledger,
            state: AdapterStateCell::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Replace the persisted presence for a scope. Setting an empty list
    /// deletes the scope from the blob, same as the ledger contract.
    pub async fn set_presences(
        &self,
        scope: &Scope,
        records: PresenceList,
    ) -> Result<(), CoreError> {
        self.ledger.set(scope.as_str(), scope, records);
        self.persist().await
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let blob = serde_json::to_value(self.ledger.activities())?;
        self.store.save(&self.identity, &blob).await
    }
}

#[async_trait]
impl Adapter for StorageAdapter {
    fn state(&self) -> AdapterState {
        self.state.get()
    }

    async fn run(&self) -> Result<(), CoreError> {
        if let Some(blob) = self.store.load(&self.identity).await? {
            match serde_json::from_value::<HashMap<Scope, PresenceList>>(blob) {
                Ok(snapshot) => {
                    for (scope, records) in snapshot {
                        self.ledger.set(scope.as_str(), &scope, records);
                    }
                }
                // A corrupt blob starts the adapter empty; the next write
                // rewrites it.
                Err(e) => tracing::warn!("Discarding unreadable blob {}: {}", self.identity, e),
            }
        }
        self.state.set_running();
        Ok(())
    }

    async fn activity_for_scope(&self, scope: &Scope) -> Result<PresenceList, CoreError> {
        Ok(self.ledger.scoped(scope))
    }

    async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError> {
        Ok(self.ledger.activities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Updates;
    use crate::presence::PresenceBuilder;
    use serde_json::json;
    use std::sync::Mutex;

    fn record(title: &str) -> crate::presence::PresenceRecord {
        PresenceBuilder::new().id(title).title(title).build()
    }

    #[tokio::test]
    async fn test_file_store_round_trips_blobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBlobStore::new(dir.path()).unwrap();

        assert!(store.load("presences").await.unwrap().is_none());

        let blob = json!({ "venus": [{ "title": "Listening" }] });
        store.save("presences", &blob).await.unwrap();
        assert_eq!(store.load("presences").await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_identities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBlobStore::new(dir.path()).unwrap();

        for identity in ["", "../escape", "a/b", "a.b"] {
            assert!(matches!(
                store.save(identity, &json!({})).await,
                Err(CoreError::Storage(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_writes_survive_a_restart() {
        let store = Arc::new(MemoryBlobStore::new());
        let venus = Scope::user("venus");

        let adapter = StorageAdapter::new(
            "presences",
            store.clone(),
            Arc::new(PresenceLedger::new(Updates::new())),
        );
        adapter.run().await.unwrap();
        adapter
            .set_presences(&venus, vec![record("Listening")])
            .await
            .unwrap();

        // A fresh adapter over the same store hydrates the snapshot.
        let revived = StorageAdapter::new(
            "presences",
            store,
            Arc::new(PresenceLedger::new(Updates::new())),
        );
        revived.run().await.unwrap();
        let records = revived.activity_for_scope(&venus).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Listening"));
    }

    #[tokio::test]
    async fn test_empty_write_clears_scope_from_blob() {
        let store = Arc::new(MemoryBlobStore::new());
        let venus = Scope::user("venus");

        let adapter = StorageAdapter::new(
            "presences",
            store.clone(),
            Arc::new(PresenceLedger::new(Updates::new())),
        );
        adapter.run().await.unwrap();
        adapter
            .set_presences(&venus, vec![record("Listening")])
            .await
            .unwrap();
        adapter.set_presences(&venus, Vec::new()).await.unwrap();

        assert!(adapter.activity_for_scope(&venus).await.unwrap().is_empty());
        assert_eq!(
            store.load("presences").await.unwrap(),
            Some(json!({}))
        );
    }

    #[tokio::test]
    async fn test_unreadable_blob_starts_empty() {
        let store = Arc::new(MemoryBlobStore::new());
        store.save("presences", &json!("not a snapshot")).await.unwrap();

        let adapter = StorageAdapter::new(
            "presences",
            store,
            Arc::new(PresenceLedger::new(Updates::new())),
        );
        adapter.run().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Running);
        assert!(adapter.activities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_writes_notify_the_bus() {
        let updates = Updates::new();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        updates.subscribe(move |scope: &Scope| {
            sink.lock().unwrap().push(scope.clone());
        });

        let adapter = StorageAdapter::new(
            "presences",
            Arc::new(MemoryBlobStore::new()),
            Arc::new(PresenceLedger::new(updates)),
        );
        adapter.run().await.unwrap();
        adapter
            .set_presences(&Scope::user("venus"), vec![record("Listening")])
            .await
            .unwrap();

        assert_eq!(notified.lock().unwrap().as_slice(), &[Scope::user("venus")]);
    }
}
