// Adapter Interface
//
// Adapters are pluggable presence sources: socket-backed, REST-session-
// backed, or platform-integration-backed. All of them answer scoped and
// global activity queries and emit `updated(scope)` through the shared
// update bus whenever their facts change.

use crate::error::CoreError;
use crate::presence::PresenceList;
use crate::scope::Scope;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

/// Adapter lifecycle state. Constructed `Ready`, flipped to `Running`
/// once I/O is established, never transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Ready,
    Running,
}

/// Atomic cell holding an [`AdapterState`].
pub struct AdapterStateCell(AtomicU8);

impl AdapterStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn get(&self) -> AdapterState {
        match self.0.load(Ordering::SeqCst) {
            0 => AdapterState::Ready,
            _ => AdapterState::Running,
        }
    }

    pub fn set_running(&self) {
        self.0.store(1, Ordering::SeqCst);
    }
}

impl Default for AdapterStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A presence source.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn state(&self) -> AdapterState;

    /// Establish the adapter's I/O. Must resolve or fail within a bounded
    /// time; the supervisor enforces a startup timeout around it.
    async fn run(&self) -> Result<(), CoreError>;

    /// Presence facts this adapter holds for one scope.
    async fn activity_for_scope(&self, scope: &Scope) -> Result<PresenceList, CoreError>;

    /// Full `scope -> presence list` view of this adapter.
    async fn activities(&self) -> Result<HashMap<Scope, PresenceList>, CoreError>;
}

/// A derived-state source (e.g. the gradient scheduler). State adapters
/// decorate the merged presence view instead of contributing records.
#[async_trait]
pub trait StateAdapter: Send + Sync {
    fn state(&self) -> AdapterState;

    async fn run(&self) -> Result<(), CoreError>;

    /// Derived state for `scope`, computed from its current merged
    /// presence list. `newly_greeted` marks a subscriber seeing the scope
    /// for the first time.
    async fn state_for_scope(
        &self,
        scope: &Scope,
        presences: &[crate::presence::PresenceRecord],
        newly_greeted: bool,
    ) -> Result<Map<String, Value>, CoreError>;
}
