use std::collections::HashMap;

use parking_lot::RwLock;

/// Per container "since" cursor: the RFC 3339 timestamp from which the next
/// log fetch starts.
#[derive(Debug, Default)]
pub struct OffsetStore {
    inner: RwLock<HashMap<String, String>>,
}

impl OffsetStore {
    pub fn get(&self, container_id: &str) -> Option<String> {
        self.inner.read().get(container_id).cloned()
    }

    pub fn set(&self, container_id: &str, since: String) {
        self.inner.write().insert(container_id.to_string(), since);
    }
}
