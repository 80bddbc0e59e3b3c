//! Thread-safe string-keyed state.
//!
//! A [`Store`] backs two things:
//! - the mutable render **state** of a single component
//! - the ambient request **context** shared by every component of a run
//!
//! Values are `serde_json::Value` so that state can be handed to templates and
//! state codecs without further conversion. A slot can also hold a nested
//! child store; nesting is only ever done by the aggregation ("state") job of
//! a component, which keeps sibling stores isolated until that point.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::StoreError;

/// Prefix reserved for internal marker keys (`__component`, `__state`).
pub const MARKER_PREFIX: &str = "__";

/// Returns true when `key` is reserved for internal markers.
pub fn is_marker(key: &str) -> bool {
    key.starts_with(MARKER_PREFIX)
}

#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    Nested(Store),
}

/// Lock-guarded mapping of string keys to JSON values.
///
/// Cloning a `Store` yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct Store {
    slots: Arc<RwLock<BTreeMap<String, Slot>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an existing JSON object. Non-object values yield an
    /// empty store.
    pub fn from_value(value: Value) -> Self {
        let store = Self::new();
        if let Value::Object(map) = value {
            let mut slots = store.write();
            for (key, value) in map {
                slots.insert(key, Slot::Value(value));
            }
        }
        store
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Slot>> {
        match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Slot>> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Get a copy of the value under `key`.
    ///
    /// Nested stores are exported recursively.
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.read().get(key).cloned()?;
        Some(match slot {
            Slot::Value(value) => value,
            Slot::Nested(store) => store.export(),
        })
    }

    /// Get the value under `key` deserialized as `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Set `key` to `value`, replacing any previous value or nested store.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write()
            .insert(key.into(), Slot::Value(value.into()));
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), StoreError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        self.set(key, value);
        Ok(())
    }

    /// Remove `key`. Returns true if something was removed.
    pub fn del(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Link another store under `key`. Its contents are exported lazily, so
    /// later writes to the child remain visible through this store.
    pub fn nest(&self, key: impl Into<String>, child: Store) {
        self.write().insert(key.into(), Slot::Nested(child));
    }

    /// Returns true if `key` holds a linked child store.
    pub fn is_nested(&self, key: &str) -> bool {
        matches!(self.read().get(key), Some(Slot::Nested(_)))
    }

    /// Keys currently present, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Export the whole store as a JSON object.
    pub fn export(&self) -> Value {
        Value::Object(self.export_map())
    }

    /// Export the whole store as a JSON map, resolving nested stores.
    pub fn export_map(&self) -> Map<String, Value> {
        // Snapshot the slots first so nested exports don't run under our lock.
        let slots: Vec<(String, Slot)> = self
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        slots
            .into_iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Value(value) => value,
                    Slot::Nested(store) => store.export(),
                };
                (key, value)
            })
            .collect()
    }

    /// Export only user fields, leaving out internal marker keys.
    pub fn export_user(&self) -> Value {
        let mut map = self.export_map();
        map.retain(|key, _| !is_marker(key));
        Value::Object(map)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_set_get_del() {
        let store = Store::new();
        store.set("count", 3);
        assert_eq!(store.get("count"), Some(json!(3)));
        assert!(store.contains("count"));

        assert!(store.del("count"));
        assert!(!store.del("count"));
        assert_eq!(store.get("count"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let store = Store::new();
        let handle = store.clone();
        handle.set("name", "trellis");
        assert_eq!(store.get("name"), Some(json!("trellis")));
    }

    #[test]
    fn test_get_as_typed() {
        #[derive(Debug, Deserialize, Serialize, PartialEq)]
        struct Profile {
            name: String,
            age: u32,
        }

        let store = Store::new();
        store
            .set_as(
                "profile",
                &Profile {
                    name: "Ada".into(),
                    age: 36,
                },
            )
            .unwrap();

        let profile: Profile = store.get_as("profile").unwrap().unwrap();
        assert_eq!(profile.age, 36);
        assert!(store.get_as::<Profile>("missing").unwrap().is_none());

        store.set("profile", "not a profile");
        let err = store.get_as::<Profile>("profile").unwrap_err();
        assert!(matches!(err, StoreError::Decode { ref key, .. } if key == "profile"));
    }

    #[test]
    fn test_nested_store_exports_lazily() {
        let parent = Store::new();
        let child = Store::new();
        child.set("count", 1);
        parent.nest("counter", child.clone());

        // Writes after linking are visible through the parent.
        child.set("count", 2);
        assert!(parent.is_nested("counter"));
        assert_eq!(parent.export(), json!({"counter": {"count": 2}}));
        assert_eq!(parent.get("counter"), Some(json!({"count": 2})));
    }

    #[test]
    fn test_export_user_skips_markers() {
        let store = Store::from_value(json!({"count": 1, "__component": "Counter"}));
        assert_eq!(store.export_user(), json!({"count": 1}));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_from_non_object_is_empty() {
        assert!(Store::from_value(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Store::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.set(format!("k{}-{}", i, j), j);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }
}
