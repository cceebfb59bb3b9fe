// Synchronous Event Fan-Out
//
// Typed observer lists with synchronous delivery: every listener runs
// before `emit` returns. This is what makes the ledger's write-implies-
// notify contract hold without a separate "mark dirty" step.

use crate::scope::Scope;
use std::sync::{Arc, Mutex};

type Listener<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A clonable list of synchronous observers over values of type `T`.
///
/// Clones share the same listener set. Listeners must not emit back into
/// the same list they are registered on.
pub struct ObserverList<T> {
    listeners: Arc<Mutex<Vec<Listener<T>>>>,
}

impl<T> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Deliver `value` to every listener, in subscription order, before
    /// returning.
    pub fn emit(&self, value: &T) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl<T> Clone for ObserverList<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide `updated(scope)` bus adapters emit on.
pub type Updates = ObserverList<Scope>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_run_before_emit_returns() {
        let updates = Updates::new();
        let count = Arc::new(AtomicUsize::new(0));

        let seen = count.clone();
        updates.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = count.clone();
        updates.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        updates.emit(&Scope::user("alice"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clones_share_listeners() {
        let updates = Updates::new();
        let cloned = updates.clone();
        cloned.subscribe(|_| {});
        assert_eq!(updates.listener_count(), 1);
    }
}
