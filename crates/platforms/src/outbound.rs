// Outbound Presence Pipes
//
// Links whose direction is PRESENTI or BIDIRECTIONAL carry presence the
// other way: the merged Presenti view for the linked scope is pushed back
// out to the platform integration. Platform adapters that can publish
// presence implement this trait; the service forwards every recomputed
// scope here after pushing it to socket subscribers.

use async_trait::async_trait;
use presenti_core::{CoreError, PresenceList, Scope};

#[async_trait]
pub trait PresenceSink: Send + Sync {
    /// Push the merged presence for a scope out to the platform. Sinks
    /// decide relevance themselves; scopes without an outbound link are
    /// a no-op.
    async fn push_presence(&self, scope: &Scope, presences: &PresenceList)
        -> Result<(), CoreError>;
}
