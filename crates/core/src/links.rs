// OAuth Links and the Link Event Bus
//
// A link ties a (platform, platform id) pair to a user, with a pipe
// direction deciding which way presence flows. Link mutations are
// broadcast on a process-wide bus so platform adapters can maintain
// their scope maps without polling the store.

use crate::error::CoreError;
use crate::events::ObserverList;
use crate::scope::Scope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Which way presence flows for a linked platform identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipeDirection {
    /// Link exists but carries no presence either way.
    Nowhere,
    /// Platform-side presence feeds into the aggregated scope.
    Platform,
    /// Presenti-side presence is pushed out to the platform.
    Presenti,
    /// Both directions.
    Bidirectional,
}

impl PipeDirection {
    /// Whether the platform is authoritative for the linked scope, i.e.
    /// its presence feeds the aggregation.
    pub fn platform_authoritative(self) -> bool {
        matches!(self, Self::Platform | Self::Bidirectional)
    }

    /// Whether the merged Presenti view is pushed back out to the
    /// platform integration.
    pub fn presenti_authoritative(self) -> bool {
        matches!(self, Self::Presenti | Self::Bidirectional)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthLink {
    pub platform: String,
    pub platform_id: String,
    pub user_uuid: String,
    pub direction: PipeDirection,
}

impl OAuthLink {
    pub fn scope(&self) -> Scope {
        Scope::user(self.user_uuid.clone())
    }
}

/// Link lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Created(OAuthLink),
    Updated(OAuthLink),
    Removed(OAuthLink),
}

/// The process-wide link lifecycle bus. Constructed once and passed by
/// reference, never looked up from global state.
pub type LinkBus = ObserverList<LinkEvent>;

/// Persistence boundary for links. The core does not own the schema.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Create or update a link; emits `Created` or `Updated` on the bus.
    async fn create_link(&self, link: OAuthLink) -> Result<(), CoreError>;

    /// Delete a link; emits `Removed` if it existed.
    async fn delete_link(&self, platform: &str, platform_id: &str) -> Result<(), CoreError>;

    async fn links_for_platform(&self, platform: &str) -> Result<Vec<OAuthLink>, CoreError>;
}

/// In-memory link store used in tests and single-process deployments.
pub struct MemoryLinkStore {
    links: RwLock<HashMap<(String, String), OAuthLink>>,
    bus: LinkBus,
}

impl MemoryLinkStore {
    pub fn new(bus: LinkBus) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            bus,
        }
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn create_link(&self, link: OAuthLink) -> Result<(), CoreError> {
        let key = (link.platform.clone(), link.platform_id.clone());
        let previous = self.links.write().await.insert(key, link.clone());
        match previous {
            Some(_) => self.bus.emit(&LinkEvent::Updated(link)),
            None => self.bus.emit(&LinkEvent::Created(link)),
        }
        Ok(())
    }

    async fn delete_link(&self, platform: &str, platform_id: &str) -> Result<(), CoreError> {
        let key = (platform.to_string(), platform_id.to_string());
        let removed = self.links.write().await.remove(&key);
        if let Some(link) = removed {
            self.bus.emit(&LinkEvent::Removed(link));
        }
        Ok(())
    }

    async fn links_for_platform(&self, platform: &str) -> Result<Vec<OAuthLink>, CoreError> {
        let links = self.links.read().await;
        Ok(links
            .values()
            .filter(|link| link.platform == platform)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn link(platform_id: &str, direction: PipeDirection) -> OAuthLink {
        OAuthLink {
            platform: "discord".to_string(),
            platform_id: platform_id.to_string(),
            user_uuid: format!("user-{}", platform_id),
            direction,
        }
    }

    #[tokio::test]
    async fn test_store_emits_lifecycle_events() {
        let bus = LinkBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        bus.subscribe(move |event: &LinkEvent| {
            seen.lock().unwrap().push(event.clone());
        });

        let store = MemoryLinkStore::new(bus);
        store
            .create_link(link("42", PipeDirection::Platform))
            .await
            .unwrap();
        store
            .create_link(link("42", PipeDirection::Nowhere))
            .await
            .unwrap();
        store.delete_link("discord", "42").await.unwrap();
        store.delete_link("discord", "missing").await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], LinkEvent::Created(_)));
        assert!(matches!(events[1], LinkEvent::Updated(_)));
        assert!(matches!(events[2], LinkEvent::Removed(_)));
    }

    #[tokio::test]
    async fn test_lookup_filters_by_platform() {
        let store = MemoryLinkStore::new(LinkBus::new());
        store
            .create_link(link("1", PipeDirection::Platform))
            .await
            .unwrap();
        store
            .create_link(OAuthLink {
                platform: "spotify".to_string(),
                platform_id: "2".to_string(),
                user_uuid: "user-2".to_string(),
                direction: PipeDirection::Bidirectional,
            })
            .await
            .unwrap();

        let links = store.links_for_platform("discord").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].platform_id, "1");
    }

    #[test]
    fn test_direction_authority() {
        assert!(PipeDirection::Platform.platform_authoritative());
        assert!(PipeDirection::Bidirectional.platform_authoritative());
        assert!(!PipeDirection::Presenti.platform_authoritative());
        assert!(!PipeDirection::Nowhere.platform_authoritative());

        assert!(PipeDirection::Presenti.presenti_authoritative());
        assert!(PipeDirection::Bidirectional.presenti_authoritative());
        assert!(!PipeDirection::Platform.presenti_authoritative());
        assert!(!PipeDirection::Nowhere.presenti_authoritative());
    }
}
