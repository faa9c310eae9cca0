//! The primary game snapshot that fallback hydration reads from.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Shared handle to the latest game snapshot.
///
/// Autosave and import replace it; snapshot fallbacks read from it with RFC
/// 6901 JSON pointers.
#[derive(Debug, Clone, Default)]
pub struct GameSnapshot {
    value: Arc<RwLock<Value>>,
}

impl GameSnapshot {
    /// Creates a handle holding `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Returns a copy of the whole snapshot.
    #[must_use]
    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Replaces the snapshot.
    pub fn replace(&self, value: Value) {
        *self.value.write() = value;
    }

    /// Looks up a value; `null` counts as absent.
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<Value> {
        self.value
            .read()
            .pointer(pointer)
            .filter(|value| !value.is_null())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pointer_lookup() {
        let snapshot = GameSnapshot::new(json!({
            "dialogue": {"day": ["hello"], "current_segment": null},
        }));

        assert_eq!(snapshot.pointer("/dialogue/day"), Some(json!(["hello"])));
        assert_eq!(snapshot.pointer("/dialogue/current_segment"), None);
        assert_eq!(snapshot.pointer("/characters"), None);

        let shared = snapshot.clone();
        shared.replace(json!({"characters": []}));
        assert_eq!(snapshot.pointer("/characters"), Some(json!([])));
    }
}
