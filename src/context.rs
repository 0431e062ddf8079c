//! Opaque context store used by guards and actions (§6, §10).
//!
//! `assign`/`lookup` are exposed on the producer handle for convenience,
//! but — as the spec documents — they are only safe to call from the
//! consumer thread (from inside a guard, action, or entry/exit hook).
//! Calling them concurrently with a running RTC step races with whatever
//! that step's actions are doing to the same keys; the mutex only
//! prevents a data race at the Rust level, not a logical one.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

/// A typed, string-keyed store for values actions and guards want to
/// share across dispatches, independent of the user's `Context` type
/// parameter.
#[derive(Default)]
pub struct ContextStore {
    values: Mutex<HashMap<String, Box<dyn Any + Send>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign<T: Any + Send>(&self, key: impl Into<String>, value: T) {
        let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.into(), Box::new(value));
    }

    pub fn lookup<T: Any + Clone + Send>(&self, key: &str) -> Option<T> {
        let guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        let guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        guard.contains_key(key)
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ContextStore")
            .field("keys", &guard.keys().collect::<Vec<_>>())
            .finish()
    }
}
