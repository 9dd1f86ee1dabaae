use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe key→bytes map backing a server.
///
/// One mutex serializes the whole map. Keys are opaque byte strings; values
/// are replaced wholesale on every store.
pub struct DramStorage {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl DramStorage {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `value` under `key`, replacing any existing value.
    pub fn store(&self, key: Vec<u8>, value: Vec<u8>) {
        tracing::info!(
            "Storing key '{}' with {} bytes",
            String::from_utf8_lossy(&key),
            value.len()
        );

        let mut entries = self.entries.lock().unwrap();
        entries.insert(key, value);
    }

    /// Returns a copy of the value under `key`, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).cloned()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.contains_key(key)
    }

    /// Removes `key`, reporting whether a value was present.
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key).is_some()
    }

    /// Snapshot of all stored keys.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.len()
    }
}

impl Default for DramStorage {
    fn default() -> Self {
        Self::new()
    }
}
