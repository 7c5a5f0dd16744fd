//! Name → reactive state directory.
//!
//! States of different value types share one map, so entries are stored
//! type-erased and downcast on the way out. Asking for a key with the wrong
//! value type is a caller bug and is reported as
//! [`LoopKeeperError::StateTypeMismatch`].

use super::{ReactiveState, StateValue};
use crate::error::{LoopKeeperError, Result};
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type ErasedState = Arc<dyn Any + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<Arc<StateRegistry>> = Lazy::new(|| Arc::new(StateRegistry::new()));

/// Thread-safe map from string key to [`ReactiveState`].
#[derive(Default)]
pub struct StateRegistry {
    states: RwLock<HashMap<String, ErasedState>>,
}

fn downcast<T: StateValue>(key: &str, erased: ErasedState) -> Result<Arc<ReactiveState<T>>> {
    erased
        .downcast::<ReactiveState<T>>()
        .map_err(|_| LoopKeeperError::StateTypeMismatch {
            key: key.to_string(),
        })
}

impl StateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. Lives until process exit; [`clear`](Self::clear)
    /// it between agent runs or tests that share it.
    pub fn global() -> Arc<StateRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Insert or overwrite `key`.
    pub fn register<T: StateValue>(&self, key: &str, state: Arc<ReactiveState<T>>) {
        let replaced = self
            .states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), state as ErasedState)
            .is_some();
        debug!(key, replaced, "Registered state");
    }

    /// Look up `key`. Returns `None` when absent or registered with another value type.
    pub fn get<T: StateValue>(&self, key: &str) -> Option<Arc<ReactiveState<T>>> {
        let erased = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()?;
        downcast(key, erased).ok()
    }

    /// Return the state under `key`, creating it with `supplier` if absent.
    ///
    /// The supplier runs while the write lock is held, so when several threads
    /// race on the same missing key exactly one supplier runs and every caller
    /// receives the same `Arc`.
    pub fn get_or_create<T, F>(&self, key: &str, supplier: F) -> Result<Arc<ReactiveState<T>>>
    where
        T: StateValue,
        F: FnOnce() -> ReactiveState<T>,
    {
        if let Some(existing) = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
        {
            return downcast(key, existing);
        }

        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        match states.entry(key.to_string()) {
            Entry::Occupied(entry) => downcast(key, Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let state = Arc::new(supplier());
                entry.insert(Arc::clone(&state) as ErasedState);
                debug!(key, "Created state");
                Ok(state)
            }
        }
    }

    /// Whether `key` is registered (with any value type).
    pub fn contains(&self, key: &str) -> bool {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    /// All registered keys, sorted.
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of registered states.
    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("keys", &self.list_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_register_and_get() {
        let registry = StateRegistry::new();
        let state = Arc::new(ReactiveState::new("a", 1u32));
        registry.register("a", Arc::clone(&state));

        let found = registry.get::<u32>("a").unwrap();
        assert!(Arc::ptr_eq(&found, &state));
        assert!(registry.get::<u32>("missing").is_none());
    }

    #[test]
    fn test_get_wrong_type_is_none() {
        let registry = StateRegistry::new();
        registry.register("a", Arc::new(ReactiveState::new("a", 1u32)));
        assert!(registry.get::<String>("a").is_none());
    }

    #[test]
    fn test_register_overwrites() {
        let registry = StateRegistry::new();
        registry.register("a", Arc::new(ReactiveState::new("a", 1u32)));
        registry.register("a", Arc::new(ReactiveState::new("a", 2u32)));
        assert_eq!(registry.get::<u32>("a").unwrap().get(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_returns_existing() {
        let registry = StateRegistry::new();
        let first = registry
            .get_or_create("k", || ReactiveState::new("k", "a".to_string()))
            .unwrap();
        let second = registry
            .get_or_create("k", || ReactiveState::new("k", "b".to_string()))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get(), "a");
    }

    #[test]
    fn test_get_or_create_type_mismatch() {
        let registry = StateRegistry::new();
        registry
            .get_or_create("k", || ReactiveState::new("k", 0u32))
            .unwrap();
        let err = registry
            .get_or_create("k", || ReactiveState::new("k", false))
            .unwrap_err();
        assert!(matches!(err, LoopKeeperError::StateTypeMismatch { ref key } if key == "k"));
    }

    #[test]
    fn test_get_or_create_race_runs_one_supplier() {
        let registry = Arc::new(StateRegistry::new());
        let barrier = Arc::new(Barrier::new(2));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ["supplierA", "supplierB"]
            .into_iter()
            .map(|label| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_create("k", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            ReactiveState::new("k", label.to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(Arc::ptr_eq(&results[0], &results[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = registry.get::<String>("k").unwrap();
        assert!(Arc::ptr_eq(&stored, &results[0]));
    }

    #[test]
    fn test_list_keys_remove_clear() {
        let registry = StateRegistry::new();
        registry.register("b", Arc::new(ReactiveState::new("b", 0u8)));
        registry.register("a", Arc::new(ReactiveState::new("a", 0u8)));
        assert_eq!(registry.list_keys(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.contains("a"));

        registry.clear();
        assert!(registry.is_empty());
    }
}
