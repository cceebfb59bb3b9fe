// Reactive Presence Ledger
//
// A two-level mapping `entry key -> scope -> presence list` where every
// write that changes a value synchronously notifies the owning adapter's
// update bus with the affected scope. Write access and change notification
// are inseparable; there is no separate "mark dirty" step.
//
// A ledger is exclusively owned by the adapter that created it. Other
// components read it only through supervisor aggregation or the read-only
// condenser view.

use crate::events::Updates;
use crate::presence::{PresenceList, PresenceRecord};
use crate::scope::Scope;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub struct PresenceLedger {
    entries: Mutex<HashMap<String, HashMap<Scope, PresenceList>>>,
    updates: Updates,
}

impl PresenceLedger {
    pub fn new(updates: Updates) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Replace the presence list stored under `(entry, scope)`.
    ///
    /// An empty list deletes the key. Notifies with the affected scope if
    /// and only if the stored value changed; the write is visible to reads
    /// before the notification fires.
    pub fn set(&self, entry: &str, scope: &Scope, records: PresenceList) {
        let changed = {
            let mut entries = self.entries.lock().unwrap();
            if records.is_empty() {
                match entries.get_mut(entry) {
                    Some(scopes) => {
                        let removed = scopes.remove(scope).is_some();
                        if scopes.is_empty() {
                            entries.remove(entry);
                        }
                        removed
                    }
                    None => false,
                }
            } else {
                let scopes = entries.entry(entry.to_string()).or_default();
                match scopes.get(scope) {
                    Some(existing) if *existing == records => false,
                    _ => {
                        scopes.insert(scope.clone(), records);
                        true
                    }
                }
            }
        };

        if changed {
            self.updates.emit(scope);
        }
    }

    pub fn updates(&self) -> &Updates {
        &self.updates
    }

    /// Read the list stored under `(entry, scope)`; unseen keys read as
    /// empty.
    pub fn get(&self, entry: &str, scope: &Scope) -> PresenceList {
        let entries = self.entries.lock().unwrap();
        entries
            .get(entry)
            .and_then(|scopes| scopes.get(scope))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove everything owned by `entry` (a closed connection or expired
    /// session), notifying once per scope that held presence.
    pub fn remove_entry(&self, entry: &str) -> Vec<Scope> {
        let affected: Vec<Scope> = {
            let mut entries = self.entries.lock().unwrap();
            match entries.remove(entry) {
                Some(scopes) => scopes.into_keys().collect(),
                None => Vec::new(),
            }
        };

        for scope in &affected {
            self.updates.emit(scope);
        }
        affected
    }

    /// All records stored for `scope`, concatenated across entry keys.
    pub fn scoped(&self, scope: &Scope) -> PresenceList {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter_map(|scopes| scopes.get(scope))
            .flat_map(|records| records.iter().cloned())
            .collect()
    }

    /// Full `scope -> presence list` view across all entry keys.
    pub fn activities(&self) -> HashMap<Scope, PresenceList> {
        let entries = self.entries.lock().unwrap();
        let mut merged: HashMap<Scope, PresenceList> = HashMap::new();
        for scopes in entries.values() {
            for (scope, records) in scopes {
                merged
                    .entry(scope.clone())
                    .or_default()
                    .extend(records.iter().cloned());
            }
        }
        merged
    }

    pub fn scopes_for_entry(&self, entry: &str) -> Vec<Scope> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(entry)
            .map(|scopes| scopes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Read-only merged view over several ledgers.
///
/// Concatenates all non-empty lists for a scope and de-duplicates records
/// carrying the same id, keeping the first occurrence. The condenser
/// exposes no mutation API; writes go through the owning ledgers only.
pub struct LedgerCondenser {
    ledgers: Vec<Arc<PresenceLedger>>,
}

impl LedgerCondenser {
    pub fn new(ledgers: Vec<Arc<PresenceLedger>>) -> Self {
        Self { ledgers }
    }

    pub fn scoped(&self, scope: &Scope) -> PresenceList {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for ledger in &self.ledgers {
            for record in ledger.scoped(scope) {
                if keep(&mut seen, &record) {
                    merged.push(record);
                }
            }
        }
        merged
    }

    pub fn activities(&self) -> HashMap<Scope, PresenceList> {
        let mut seen: HashMap<Scope, HashSet<String>> = HashMap::new();
        let mut merged: HashMap<Scope, PresenceList> = HashMap::new();
        for ledger in &self.ledgers {
            for (scope, records) in ledger.activities() {
                let scope_seen = seen.entry(scope.clone()).or_default();
                let list = merged.entry(scope).or_default();
                for record in records {
                    if keep(scope_seen, &record) {
                        list.push(record);
                    }
                }
            }
        }
        merged
    }
}

fn keep(seen: &mut HashSet<String>, record: &PresenceRecord) -> bool {
    match &record.id {
        Some(id) => seen.insert(id.clone()),
        None => true,
    }
}
