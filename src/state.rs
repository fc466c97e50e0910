//! Per-request scratch space shared between middleware and the handler.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Key → value storage created fresh for every request.
///
/// Values are type-erased; read them back with the type they were stored as.
/// A key that was set to `()` or `None::<T>` still *exists*; only a key that
/// was never set (or was removed) is absent.
#[derive(Default)]
pub struct StateStore {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<V>(&mut self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Typed read. `None` when the key is absent *or* holds another type.
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.entries.get(key)?.downcast_ref()
    }

    /// Untyped read; `Some` for every key that has been set.
    pub fn get_any(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.entries.get(key).map(|value| &**value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
