use std::{
    any::Any,
    fmt::{self, Debug},
};

use ahash::AHashMap;

/// Opaque per-connection or per-transaction storage shared between stages.
#[derive(Default)]
pub struct Notes(AHashMap<String, Box<dyn Any + Send + Sync>>);

impl Notes {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Box::new(value));
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.0.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.0.get_mut(key).and_then(|value| value.downcast_mut())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    /// Convenience for notes holding a flag.
    pub fn flag(&self, key: &str) -> bool {
        self.get::<bool>(key).copied().unwrap_or_default()
    }
}

impl Debug for Notes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
