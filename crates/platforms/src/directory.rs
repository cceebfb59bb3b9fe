// Platform Scope Directory
//
// In-memory `platform id -> (scope, direction)` map a platform adapter
// consults on the hot path instead of the link store. Rebuilt in full at
// boot and kept current by link lifecycle events. Inbound queries answer
// only platform-authoritative links; outbound queries answer only
// presenti-authoritative ones. Losing inbound authority notifies the
// orphaned scope so subscribers see the platform presence disappear.

use presenti_core::{CoreError, LinkBus, LinkEvent, LinkStore, OAuthLink, PipeDirection, Scope, Updates};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ScopeDirectory {
    platform: String,
    map: Mutex<HashMap<String, (Scope, PipeDirection)>>,
    updates: Updates,
}

impl ScopeDirectory {
    pub fn new(platform: &str, updates: Updates) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.to_string(),
            map: Mutex::new(HashMap::new()),
            updates,
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Full rebuild from the link store. Links carrying no presence in
    /// either direction are dropped.
    pub async fn reload(&self, store: &dyn LinkStore) -> Result<(), CoreError> {
        let links = store.links_for_platform(&self.platform).await?;
        let mut map = self.map.lock().unwrap();
        map.clear();
        for link in links {
            if link.direction != PipeDirection::Nowhere {
                map.insert(link.platform_id.clone(), (link.scope(), link.direction));
            }
        }
        tracing::debug!("Directory for {} reloaded: {} mappings", self.platform, map.len());
        Ok(())
    }

    /// Subscribe to the link bus for incremental updates. Called once at
    /// adapter startup.
    pub fn attach(self: &Arc<Self>, bus: &LinkBus) {
        let directory = self.clone();
        bus.subscribe(move |event: &LinkEvent| directory.apply(event));
    }

    pub fn apply(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Created(link) | LinkEvent::Updated(link) => {
                if link.platform != self.platform {
                    return;
                }
                if link.direction == PipeDirection::Nowhere {
                    self.remove(link);
                } else {
                    self.insert(link);
                }
            }
            LinkEvent::Removed(link) => {
                if link.platform == self.platform {
                    self.remove(link);
                }
            }
        }
    }

    fn insert(&self, link: &OAuthLink) {
        let previous = self
            .map
            .lock()
            .unwrap()
            .insert(link.platform_id.clone(), (link.scope(), link.direction));
        // A scope stops being fed by this link when the link loses
        // platform authority or moves to another user.
        if let Some((scope, direction)) = previous {
            if direction.platform_authoritative()
                && (!link.direction.platform_authoritative() || scope != link.scope())
            {
                self.updates.emit(&scope);
            }
        }
    }

    fn remove(&self, link: &OAuthLink) {
        let removed = self.map.lock().unwrap().remove(&link.platform_id);
        if let Some((scope, direction)) = removed {
            if direction.platform_authoritative() {
                self.updates.emit(&scope);
            }
        }
    }

    /// Inbound lookup: the scope this platform identity feeds, if any.
    pub fn scope_for(&self, platform_id: &str) -> Option<Scope> {
        self.map
            .lock()
            .unwrap()
            .get(platform_id)
            .filter(|(_, direction)| direction.platform_authoritative())
            .map(|(scope, _)| scope.clone())
    }

    /// Inbound lookup: whether any link feeds this scope.
    pub fn contains_scope(&self, scope: &Scope) -> bool {
        self.map
            .lock()
            .unwrap()
            .values()
            .any(|(s, direction)| direction.platform_authoritative() && s == scope)
    }

    /// Outbound lookup: whether the merged view for this scope should be
    /// pushed back out to the platform.
    pub fn pushes_outbound(&self, scope: &Scope) -> bool {
        self.map
            .lock()
            .unwrap()
            .values()
            .any(|(s, direction)| direction.presenti_authoritative() && s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presenti_core::MemoryLinkStore;

    fn link(direction: PipeDirection) -> OAuthLink {
        OAuthLink {
            platform: "discord".to_string(),
            platform_id: "42".to_string(),
            user_uuid: "venus".to_string(),
            direction,
        }
    }

    fn counted_updates() -> (Updates, Arc<Mutex<Vec<Scope>>>) {
        let updates = Updates::new();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        updates.subscribe(move |scope: &Scope| {
            sink.lock().unwrap().push(scope.clone());
        });
        (updates, notified)
    }

    #[tokio::test]
    async fn test_reload_keeps_carrying_links_only() {
        let bus = LinkBus::new();
        let store = MemoryLinkStore::new(bus);
        store.create_link(link(PipeDirection::Platform)).await.unwrap();
        store
            .create_link(OAuthLink {
                platform: "discord".to_string(),
                platform_id: "7".to_string(),
                user_uuid: "mars".to_string(),
                direction: PipeDirection::Nowhere,
            })
            .await
            .unwrap();
        store
            .create_link(OAuthLink {
                platform: "spotify".to_string(),
                platform_id: "9".to_string(),
                user_uuid: "pluto".to_string(),
                direction: PipeDirection::Platform,
            })
            .await
            .unwrap();

        let directory = ScopeDirectory::new("discord", Updates::new());
        directory.reload(&store).await.unwrap();

        assert_eq!(directory.scope_for("42"), Some(Scope::user("venus")));
        assert_eq!(directory.scope_for("7"), None);
        assert_eq!(directory.scope_for("9"), None);
    }

    #[test]
    fn test_platform_direction_inserts_mapping() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(link(PipeDirection::Platform)));
        assert_eq!(directory.scope_for("42"), Some(Scope::user("venus")));
        assert!(!directory.pushes_outbound(&Scope::user("venus")));
        assert!(notified.lock().unwrap().is_empty());
    }

    #[test]
    fn test_presenti_direction_is_outbound_only() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(link(PipeDirection::Presenti)));
        assert_eq!(directory.scope_for("42"), None);
        assert!(!directory.contains_scope(&Scope::user("venus")));
        assert!(directory.pushes_outbound(&Scope::user("venus")));
        assert!(notified.lock().unwrap().is_empty());

        // An outbound-only link never fed the aggregation, so removing
        // it notifies nobody.
        directory.apply(&LinkEvent::Removed(link(PipeDirection::Presenti)));
        assert!(!directory.pushes_outbound(&Scope::user("venus")));
        assert!(notified.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bidirectional_maps_both_ways() {
        let directory = ScopeDirectory::new("discord", Updates::new());

        directory.apply(&LinkEvent::Created(link(PipeDirection::Bidirectional)));
        assert_eq!(directory.scope_for("42"), Some(Scope::user("venus")));
        assert!(directory.pushes_outbound(&Scope::user("venus")));
    }

    #[test]
    fn test_update_to_nowhere_removes_and_notifies_once() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(link(PipeDirection::Platform)));
        directory.apply(&LinkEvent::Updated(link(PipeDirection::Nowhere)));

        assert_eq!(directory.scope_for("42"), None);
        assert_eq!(notified.lock().unwrap().as_slice(), &[Scope::user("venus")]);

        // Already gone: no second notification.
        directory.apply(&LinkEvent::Updated(link(PipeDirection::Nowhere)));
        assert_eq!(notified.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_losing_platform_authority_notifies_the_scope() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(link(PipeDirection::Platform)));
        directory.apply(&LinkEvent::Updated(link(PipeDirection::Presenti)));

        assert_eq!(directory.scope_for("42"), None);
        assert!(directory.pushes_outbound(&Scope::user("venus")));
        assert_eq!(notified.lock().unwrap().as_slice(), &[Scope::user("venus")]);
    }

    #[test]
    fn test_removal_notifies_orphaned_scope() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(link(PipeDirection::Bidirectional)));
        directory.apply(&LinkEvent::Removed(link(PipeDirection::Bidirectional)));

        assert_eq!(directory.scope_for("42"), None);
        assert_eq!(notified.lock().unwrap().as_slice(), &[Scope::user("venus")]);
    }

    #[test]
    fn test_other_platform_events_are_ignored() {
        let (updates, notified) = counted_updates();
        let directory = ScopeDirectory::new("discord", updates);

        directory.apply(&LinkEvent::Created(OAuthLink {
            platform: "spotify".to_string(),
            platform_id: "42".to_string(),
            user_uuid: "venus".to_string(),
            direction: PipeDirection::Platform,
        }));
        assert_eq!(directory.scope_for("42"), None);
        assert!(notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bus_attachment_tracks_live_changes() {
        let bus = LinkBus::new();
        let directory = ScopeDirectory::new("discord", Updates::new());
        directory.attach(&bus);

        let store = MemoryLinkStore::new(bus);
        store.create_link(link(PipeDirection::Platform)).await.unwrap();
        assert_eq!(directory.scope_for("42"), Some(Scope::user("venus")));

        store.delete_link("discord", "42").await.unwrap();
        assert_eq!(directory.scope_for("42"), None);
    }
}
